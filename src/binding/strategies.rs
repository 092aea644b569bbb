//! 内置绑定策略

use super::BindingStrategy;
use crate::config::node::{ConfigurationNode, ConfigurationNodeExt};
use crate::error::{ForgeError, Result};
use crate::lookup::{Instance, InstanceLookup, TypeKey};
use tracing::debug;

/// 单值节点的文本，结构节点返回 None
fn scalar_text(node: &dyn ConfigurationNode) -> Result<Option<String>> {
    if !node.is_single() {
        return Ok(None);
    }
    Ok(node
        .get_value::<String>()?
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty()))
}

/// 按类型标识选择子类型工厂构建内嵌组件
#[derive(Debug, Clone, Copy, Default)]
pub struct SubTypeFactoryBinding;

impl BindingStrategy for SubTypeFactoryBinding {
    fn name(&self) -> &'static str {
        "sub-type-factory"
    }

    fn bind(
        &self,
        lookup: &dyn InstanceLookup,
        key: TypeKey,
        node: &dyn ConfigurationNode,
    ) -> Result<Option<Instance>> {
        if node.is_single() {
            return Ok(None);
        }
        let (Some(discriminator), Some(factories)) = (node.declared_type(), lookup.sub_factories(key))
        else {
            return Ok(None);
        };
        factories.create_for(discriminator, node).transpose()
    }
}

/// 用类型的默认子类型工厂构建内嵌组件
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSubTypeBinding;

impl BindingStrategy for DefaultSubTypeBinding {
    fn name(&self) -> &'static str {
        "default-sub-type-factory"
    }

    fn bind(
        &self,
        lookup: &dyn InstanceLookup,
        key: TypeKey,
        node: &dyn ConfigurationNode,
    ) -> Result<Option<Instance>> {
        if node.is_single() {
            return Ok(None);
        }
        match lookup.sub_factories(key) {
            Some(factories) => factories.create_default(node).transpose(),
            None => Ok(None),
        }
    }
}

/// 按名称引用已注册的单例
#[derive(Debug, Clone, Copy, Default)]
pub struct NamedInstanceBinding;

impl BindingStrategy for NamedInstanceBinding {
    fn name(&self) -> &'static str {
        "named-instance"
    }

    fn bind(
        &self,
        lookup: &dyn InstanceLookup,
        key: TypeKey,
        node: &dyn ConfigurationNode,
    ) -> Result<Option<Instance>> {
        Ok(scalar_text(node)?.and_then(|name| lookup.named(key, &name)))
    }
}

/// 通过组件管理器获取或构建
///
/// 单值节点视为组件 id；结构节点交给管理器直接构建一个不登记的实例。
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagerBinding;

impl BindingStrategy for ManagerBinding {
    fn name(&self) -> &'static str {
        "component-manager"
    }

    fn bind(
        &self,
        lookup: &dyn InstanceLookup,
        key: TypeKey,
        node: &dyn ConfigurationNode,
    ) -> Result<Option<Instance>> {
        let Some(manager) = lookup.manager(key) else {
            return Ok(None);
        };
        if !node.is_single() {
            return match manager.create_instance(node) {
                Ok(instance) => Ok(Some(instance)),
                Err(
                    e @ (ForgeError::TypeResolution { .. }
                    | ForgeError::ConfigurationMissing { .. }),
                ) => {
                    debug!("{} 无法构建内嵌组件: {}，继续尝试其他绑定", manager.component_type(), e);
                    Ok(None)
                }
                Err(e) => Err(e),
            };
        }
        let Some(id) = scalar_text(node)? else {
            return Ok(None);
        };
        match manager.get_instance(&id) {
            Ok(instance) => Ok(Some(instance)),
            Err(ForgeError::ConfigurationMissing { .. }) => {
                debug!("{} 没有 id 为 '{}' 的配置，继续尝试其他绑定", manager.component_type(), id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// 在按键索引的备选实例中查找
#[derive(Debug, Clone, Copy, Default)]
pub struct MapKeyedBinding;

impl BindingStrategy for MapKeyedBinding {
    fn name(&self) -> &'static str {
        "map-keyed"
    }

    fn bind(
        &self,
        lookup: &dyn InstanceLookup,
        key: TypeKey,
        node: &dyn ConfigurationNode,
    ) -> Result<Option<Instance>> {
        Ok(scalar_text(node)?.and_then(|map_key| lookup.keyed(key, &map_key)))
    }
}
