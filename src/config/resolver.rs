//! 配置解析器
//!
//! 按 `${id}.${type}.*` 命名约定把组件 id 映射到配置节点

use crate::config::json::JsonNode;
use crate::config::node::ConfigurationNode;
use crate::config::properties::{join_key, PropertiesNode, PropertiesSource, TYPE_FIELD};
use crate::error::{ConfigError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// 单一组件类型的配置解析器
pub trait ComponentConfigurationResolver: Send + Sync {
    /// 获取 id 对应的配置，没有任何配置时返回 None
    fn configuration(&self, id: &str) -> Result<Option<Arc<dyn ConfigurationNode>>>;

    /// 枚举该类型的全部配置，按 id 去重
    fn all_configurations(&self) -> Result<HashMap<String, Arc<dyn ConfigurationNode>>>;
}

/// 按组件类型提供配置解析器
pub trait TypeConfigurationResolver: Send + Sync {
    /// 获取组件类型的配置解析器
    ///
    /// # 参数
    /// * `component_type` - 组件类型，例如 `widget`
    fn resolver_for(&self, component_type: &str) -> Result<Arc<dyn ComponentConfigurationResolver>>;
}

/// 基于扁平键值配置源的类型解析器
pub struct PropertiesTypeConfigurationResolver {
    /// 全部组件的配置
    source: Arc<PropertiesSource>,
    /// 命名约定不适用时按类型覆盖的解析器
    overrides: HashMap<String, Arc<dyn ComponentConfigurationResolver>>,
}

impl PropertiesTypeConfigurationResolver {
    /// 创建解析器
    pub fn new(source: Arc<PropertiesSource>) -> Self {
        Self {
            source,
            overrides: HashMap::new(),
        }
    }

    /// 为某个组件类型指定覆盖解析器
    pub fn with_override(
        mut self,
        component_type: impl Into<String>,
        resolver: Arc<dyn ComponentConfigurationResolver>,
    ) -> Self {
        self.overrides.insert(component_type.into(), resolver);
        self
    }

    /// 配置源
    pub fn source(&self) -> &Arc<PropertiesSource> {
        &self.source
    }
}

impl TypeConfigurationResolver for PropertiesTypeConfigurationResolver {
    fn resolver_for(&self, component_type: &str) -> Result<Arc<dyn ComponentConfigurationResolver>> {
        if let Some(resolver) = self.overrides.get(component_type) {
            return Ok(Arc::clone(resolver));
        }
        Ok(Arc::new(PropertiesComponentResolver::new(
            Arc::clone(&self.source),
            component_type,
        )?))
    }
}

/// 单一组件类型的扁平键值解析器
#[derive(Debug)]
pub struct PropertiesComponentResolver {
    source: Arc<PropertiesSource>,
    component_type: String,
}

impl PropertiesComponentResolver {
    /// 创建解析器，组件类型为空时立即失败
    pub fn new(source: Arc<PropertiesSource>, component_type: &str) -> Result<Self> {
        if component_type.trim().is_empty() {
            return Err(ConfigError::MissingComponentType.into());
        }
        Ok(Self {
            source,
            component_type: component_type.to_string(),
        })
    }

    fn embedded_json(&self, id: &str, prefix: &str, flat_type: Option<String>) -> Result<Option<Arc<dyn ConfigurationNode>>> {
        let Some(text) = self.source.get(prefix) else {
            return Ok(None);
        };
        let text = text.trim();
        if !(text.starts_with('{') && text.ends_with('}')) {
            return Ok(None);
        }
        let node = JsonNode::parse(Some(id.to_string()), prefix, text, flat_type)?;
        Ok(Some(Arc::new(node)))
    }
}

impl ComponentConfigurationResolver for PropertiesComponentResolver {
    fn configuration(&self, id: &str) -> Result<Option<Arc<dyn ConfigurationNode>>> {
        let prefix = format!("{}.{}", id, self.component_type);
        let flat_type = self.source.get(&join_key(&prefix, TYPE_FIELD));

        if let Some(node) = self.embedded_json(id, &prefix, flat_type.clone())? {
            debug!("使用内嵌JSON配置: {}", prefix);
            return Ok(Some(node));
        }

        let node = PropertiesNode::new(
            Arc::clone(&self.source),
            Some(id.to_string()),
            flat_type,
            prefix,
        );
        if node.is_empty() {
            return Ok(None);
        }
        Ok(Some(Arc::new(node)))
    }

    fn all_configurations(&self) -> Result<HashMap<String, Arc<dyn ConfigurationNode>>> {
        let mut configs: HashMap<String, Arc<dyn ConfigurationNode>> = HashMap::new();
        for key in self.source.keys() {
            let mut parts = key.split('.');
            let (Some(id), Some(component_type)) = (parts.next(), parts.next()) else {
                continue;
            };
            if component_type != self.component_type || configs.contains_key(id) {
                continue;
            }
            match self.configuration(id) {
                Ok(Some(node)) => {
                    configs.insert(id.to_string(), node);
                }
                Ok(None) => {}
                Err(e) => warn!("跳过无效配置 '{}': {}", id, e),
            }
        }
        Ok(configs)
    }
}

/// 固定 id → 节点映射的解析器
#[derive(Debug, Default)]
pub struct StaticConfigurationResolver {
    nodes: HashMap<String, Arc<dyn ConfigurationNode>>,
}

impl StaticConfigurationResolver {
    /// 创建空解析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加配置
    pub fn with_node(mut self, id: impl Into<String>, node: Arc<dyn ConfigurationNode>) -> Self {
        self.nodes.insert(id.into(), node);
        self
    }
}

impl ComponentConfigurationResolver for StaticConfigurationResolver {
    fn configuration(&self, id: &str) -> Result<Option<Arc<dyn ConfigurationNode>>> {
        Ok(self.nodes.get(id).cloned())
    }

    fn all_configurations(&self) -> Result<HashMap<String, Arc<dyn ConfigurationNode>>> {
        Ok(self.nodes.clone())
    }
}
