//! 引用绑定链
//!
//! 属性声明为外部类型引用时，按固定顺序尝试各绑定策略，第一个成功的生效：
//!
//! 1. 子类型工厂：结构节点带类型标识，且该类型注册了对应工厂
//! 2. 默认子类型工厂：结构节点，且该类型注册了默认工厂
//! 3. 具名实例：单值节点，值为已注册单例的名称
//! 4. 组件管理器：单值节点按 id 获取，结构节点直接构建内联实例
//! 5. 按键索引：单值节点，值为备选实例映射中的键
//!
//! 全部策略都不适用时属性保持构建器默认值，这不是错误。

pub mod strategies;

use crate::binder::{binder_fn, Bound, PropertyBinder, PropertyBinderFactory, PropertyShape};
use crate::config::node::ConfigurationNode;
use crate::error::Result;
use crate::lookup::{Instance, InstanceLookup, TypeKey};
use std::sync::Arc;
use tracing::trace;

pub use strategies::{
    DefaultSubTypeBinding, ManagerBinding, MapKeyedBinding, NamedInstanceBinding,
    SubTypeFactoryBinding,
};

/// 单个绑定策略
pub trait BindingStrategy: Send + Sync {
    /// 策略名称，用于日志
    fn name(&self) -> &'static str;

    /// 尝试把节点解析为 `key` 类型的实例，不适用时返回 `Ok(None)`
    fn bind(
        &self,
        lookup: &dyn InstanceLookup,
        key: TypeKey,
        node: &dyn ConfigurationNode,
    ) -> Result<Option<Instance>>;
}

/// 有序的绑定策略链
#[derive(Clone)]
pub struct BindingChain {
    strategies: Vec<Arc<dyn BindingStrategy>>,
}

impl BindingChain {
    /// 使用指定策略顺序
    pub fn new(strategies: Vec<Arc<dyn BindingStrategy>>) -> Self {
        Self { strategies }
    }

    /// 依次尝试所有策略
    pub fn resolve(
        &self,
        lookup: &dyn InstanceLookup,
        key: TypeKey,
        node: &dyn ConfigurationNode,
    ) -> Result<Option<Instance>> {
        for strategy in &self.strategies {
            if let Some(instance) = strategy.bind(lookup, key, node)? {
                trace!("{} 由 {} 绑定为 {:?}", node.path(), strategy.name(), key);
                return Ok(Some(instance));
            }
        }
        Ok(None)
    }
}

impl Default for BindingChain {
    fn default() -> Self {
        Self::new(vec![
            Arc::new(SubTypeFactoryBinding),
            Arc::new(DefaultSubTypeBinding),
            Arc::new(NamedInstanceBinding),
            Arc::new(ManagerBinding),
            Arc::new(MapKeyedBinding),
        ])
    }
}

impl PropertyBinderFactory for BindingChain {
    fn name(&self) -> &'static str {
        "binding"
    }

    fn create(&self, shape: &PropertyShape) -> Option<Arc<dyn PropertyBinder>> {
        let PropertyShape::Reference(key) = shape else {
            return None;
        };
        let key = *key;
        let chain = self.clone();
        Some(binder_fn(move |lookup, node| {
            Ok(chain.resolve(lookup, key, node)?.map(Bound::Instance))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::json::JsonNode;
    use crate::lookup::{EmptyLookup, Registry};
    use serde_json::json;

    #[test]
    fn test_unresolved_reference_is_not_an_error() {
        let chain = BindingChain::default();
        let node = JsonNode::new(None, None, "p", json!("missing"));
        let result = chain
            .resolve(&EmptyLookup, TypeKey::of::<String>(), &node)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_named_before_keyed() {
        let registry = Registry::new();
        registry.register_named::<String>("shared", Arc::new("named".to_string()));
        registry.register_keyed::<String>("shared", Arc::new("keyed".to_string()));

        let chain = BindingChain::default();
        let node = JsonNode::new(None, None, "p", json!("shared"));
        let instance = chain
            .resolve(&registry, TypeKey::of::<String>(), &node)
            .unwrap()
            .unwrap();
        assert_eq!(*instance.downcast::<String>().unwrap(), "named");
    }

    #[test]
    fn test_chain_is_binder_factory_for_references_only() {
        let chain = BindingChain::default();
        assert!(chain
            .create(&PropertyShape::Reference(TypeKey::of::<String>()))
            .is_some());
        assert!(chain.create(&PropertyShape::Class).is_none());
    }
}
