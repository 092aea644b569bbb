//! 结构化（JSON）配置节点

use crate::config::dynamic::Dynamic;
use crate::config::node::{ConfigurationNode, Fingerprint};
use crate::config::properties::{join_key, TYPE_FIELD};
use crate::config::value::{Value, ValueKind};
use crate::error::ConfigError;
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// 基于 JSON 树的配置节点，不支持变更通知
#[derive(Debug, Clone)]
pub struct JsonNode {
    id: Option<String>,
    declared_type: Option<String>,
    path: String,
    node: Arc<Json>,
}

impl JsonNode {
    /// 创建节点
    pub fn new(id: Option<String>, declared_type: Option<String>, path: impl Into<String>, node: Json) -> Self {
        Self {
            id,
            declared_type,
            path: path.into(),
            node: Arc::new(node),
        }
    }

    /// 解析 JSON 文本，`type` 字段作为类型标识
    ///
    /// # 参数
    /// * `id` - 组件 id
    /// * `path` - 配置路径
    /// * `text` - JSON 文本
    /// * `fallback_type` - JSON 中没有 `type` 字段时使用的类型标识
    pub fn parse(
        id: Option<String>,
        path: impl Into<String>,
        text: &str,
        fallback_type: Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = path.into();
        let node: Json = serde_json::from_str(text).map_err(|e| {
            ConfigError::ParseError(format!("无法解析 '{}' 的 JSON: {}", path, e))
        })?;
        if !node.is_object() {
            return Err(ConfigError::ParseError(format!(
                "'{}' 的 JSON 必须是对象",
                path
            )));
        }
        let declared_type = node
            .get(TYPE_FIELD)
            .and_then(Json::as_str)
            .map(str::to_string)
            .or(fallback_type);
        Ok(Self::new(id, declared_type, path, node))
    }

    fn scalar_text(&self) -> Option<String> {
        match &*self.node {
            Json::String(s) => Some(s.clone()),
            Json::Number(n) => Some(n.to_string()),
            Json::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl ConfigurationNode for JsonNode {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn declared_type(&self) -> Option<&str> {
        self.declared_type.as_deref()
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn value(&self, kind: ValueKind) -> Result<Option<Value>, ConfigError> {
        if kind == ValueKind::Properties {
            return Ok(self.node.as_object().map(|fields| {
                let map: BTreeMap<String, String> = fields
                    .iter()
                    .map(|(k, v)| {
                        let text = match v {
                            Json::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), text)
                    })
                    .collect();
                Value::Properties(map)
            }));
        }
        match self.scalar_text() {
            Some(text) => kind.parse(&self.path, &text).map(Some),
            None => Ok(None),
        }
    }

    fn dynamic_value(&self, _kind: ValueKind) -> Option<Dynamic<Value>> {
        None
    }

    fn child(&self, name: &str) -> Option<Arc<dyn ConfigurationNode>> {
        let child = self.node.get(name)?;
        if child.is_null() {
            return None;
        }
        let declared_type = child
            .get(TYPE_FIELD)
            .and_then(Json::as_str)
            .map(str::to_string);
        Some(Arc::new(JsonNode::new(
            None,
            declared_type,
            join_key(&self.path, name),
            child.clone(),
        )))
    }

    fn is_single(&self) -> bool {
        !self.node.is_object()
    }

    fn has_child(&self, name: &str) -> bool {
        self.node.get(name).is_some_and(|child| !child.is_null())
    }

    fn unknown_properties(&self, supported: &BTreeSet<String>) -> BTreeSet<String> {
        self.node
            .as_object()
            .map(|fields| {
                fields
                    .keys()
                    .filter(|k| k.as_str() != TYPE_FIELD && !supported.contains(*k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            id: self.id.clone(),
            declared_type: self.declared_type.clone(),
            data: (*self.node).clone(),
        }
    }
}
