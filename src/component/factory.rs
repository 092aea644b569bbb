//! 组件工厂
//!
//! [`BindingComponentFactory`] 按编译后的配方从配置节点构建组件：
//! 实例化构建器、设置 id、逐个绑定属性，最后调用 build。

use crate::binder::BinderFactoryResolver;
use crate::component::recipe::{CompiledRecipe, PropertyDescriptor, Recipe};
use crate::config::node::ConfigurationNode;
use crate::error::{ForgeError, Result};
use crate::lookup::{EmptyLookup, Instance, InstanceLookup, SubTypeFactories};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// 组件工厂
pub trait ComponentFactory<T: ?Sized>: Send + Sync {
    /// 从配置节点构建组件
    fn create(&self, node: &dyn ConfigurationNode) -> Result<Arc<T>>;

    /// 可配置属性
    fn properties(&self) -> Vec<PropertyDescriptor>;

    /// 构建器类型名
    fn raw_type(&self) -> &'static str;
}

/// 基于配方和属性绑定的组件工厂
pub struct BindingComponentFactory<B, T: ?Sized> {
    recipe: CompiledRecipe<B, T>,
    lookup: Option<Weak<dyn InstanceLookup>>,
}

impl<B, T> BindingComponentFactory<B, T>
where
    B: Send + 'static,
    T: ?Sized + 'static,
{
    /// 编译配方并创建工厂
    ///
    /// # 参数
    /// * `recipe` - 组件配方
    /// * `binders` - 属性绑定器工厂集合
    pub fn new(recipe: Recipe<B, T>, binders: &BinderFactoryResolver) -> Self {
        let recipe = recipe.compile(binders);
        debug!(
            "编译配方 {}: {} 个属性",
            recipe.raw_type,
            recipe.properties.len()
        );
        Self {
            recipe,
            lookup: None,
        }
    }

    /// 绑定引用属性时使用的查找契约
    ///
    /// 只持有弱引用，注册表通常也持有使用本工厂的管理器。
    pub fn with_lookup(mut self, lookup: Weak<dyn InstanceLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    fn component_label(&self, node: &dyn ConfigurationNode) -> String {
        node.declared_type().unwrap_or(self.recipe.raw_type).to_string()
    }

    fn construct(&self, lookup: &dyn InstanceLookup, node: &dyn ConfigurationNode) -> Result<Arc<T>> {
        let fail = |source: anyhow::Error| {
            ForgeError::construction(self.component_label(node), node.id(), source)
        };

        let mut builder = (self.recipe.instantiator)(lookup, node).map_err(fail)?;

        if let (Some(id), Some(set_id)) = (node.id(), &self.recipe.id_setter) {
            set_id(&mut builder, id);
        }

        for property in &self.recipe.properties {
            let Some(child) = node.child(property.name()) else {
                continue;
            };
            let applied = property
                .apply(lookup, &mut builder, child.as_ref())
                .map_err(|e| fail(e.into()))?;
            if !applied {
                debug!("属性 {} 未绑定，保持默认值", child.path());
            }
        }

        let supported: BTreeSet<String> = self
            .recipe
            .properties
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        let unknown = node.unknown_properties(&supported);
        if !unknown.is_empty() {
            debug!("{} 中未使用的配置项: {:?}", node.path(), unknown);
        }

        (self.recipe.finisher)(builder).map_err(fail)
    }
}

impl<B, T> ComponentFactory<T> for BindingComponentFactory<B, T>
where
    B: Send + 'static,
    T: ?Sized + 'static,
{
    fn create(&self, node: &dyn ConfigurationNode) -> Result<Arc<T>> {
        match &self.lookup {
            None => self.construct(&EmptyLookup, node),
            Some(weak) => {
                let lookup = weak.upgrade().ok_or_else(|| {
                    ForgeError::construction(
                        self.component_label(node),
                        node.id(),
                        anyhow::anyhow!("实例注册表已释放"),
                    )
                })?;
                self.construct(lookup.as_ref(), node)
            }
        }
    }

    fn properties(&self) -> Vec<PropertyDescriptor> {
        self.recipe
            .properties
            .iter()
            .map(PropertyDescriptor::from)
            .collect()
    }

    fn raw_type(&self) -> &'static str {
        self.recipe.raw_type
    }
}

impl<B, T: ?Sized> fmt::Debug for BindingComponentFactory<B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingComponentFactory")
            .field("raw_type", &self.recipe.raw_type)
            .field("properties", &self.recipe.properties.len())
            .finish()
    }
}

/// 按类型标识索引的工厂集合，可带一个默认工厂
pub struct FactorySet<T: ?Sized> {
    factories: HashMap<String, Arc<dyn ComponentFactory<T>>>,
    default: Option<Arc<dyn ComponentFactory<T>>>,
}

impl<T: ?Sized> Clone for FactorySet<T> {
    fn clone(&self) -> Self {
        Self {
            factories: self.factories.clone(),
            default: self.default.clone(),
        }
    }
}

impl<T: ?Sized> Default for FactorySet<T> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
            default: None,
        }
    }
}

impl<T: ?Sized> FactorySet<T> {
    /// 创建空集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加工厂
    pub fn with(mut self, discriminator: impl Into<String>, factory: Arc<dyn ComponentFactory<T>>) -> Self {
        self.insert(discriminator, factory);
        self
    }

    /// 设置默认工厂
    pub fn with_default(mut self, factory: Arc<dyn ComponentFactory<T>>) -> Self {
        self.default = Some(factory);
        self
    }

    /// 添加工厂，返回被替换的旧工厂
    pub fn insert(
        &mut self,
        discriminator: impl Into<String>,
        factory: Arc<dyn ComponentFactory<T>>,
    ) -> Option<Arc<dyn ComponentFactory<T>>> {
        self.factories.insert(discriminator.into(), factory)
    }

    /// 设置默认工厂
    pub fn set_default(&mut self, factory: Arc<dyn ComponentFactory<T>>) {
        self.default = Some(factory);
    }

    /// 按类型标识查找工厂
    pub fn get(&self, discriminator: &str) -> Option<Arc<dyn ComponentFactory<T>>> {
        self.factories.get(discriminator).cloned()
    }

    /// 默认工厂
    pub fn default_factory(&self) -> Option<Arc<dyn ComponentFactory<T>>> {
        self.default.clone()
    }

    /// 选择工厂：先按类型标识，找不到时使用默认工厂
    pub fn select(&self, discriminator: Option<&str>) -> Option<Arc<dyn ComponentFactory<T>>> {
        discriminator
            .and_then(|d| self.get(d))
            .or_else(|| self.default_factory())
    }

    /// 已知的类型标识，已排序
    pub fn known_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// 是否没有任何工厂
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty() && self.default.is_none()
    }
}

impl<T: ?Sized> fmt::Debug for FactorySet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactorySet")
            .field("types", &self.known_types())
            .field("default", &self.default.as_ref().map(|d| d.raw_type()))
            .finish()
    }
}

impl<T: ?Sized + Send + Sync + 'static> SubTypeFactories for FactorySet<T> {
    fn create_for(
        &self,
        discriminator: &str,
        node: &dyn ConfigurationNode,
    ) -> Option<Result<Instance>> {
        let factory = self.get(discriminator)?;
        Some(factory.create(node).map(Instance::new))
    }

    fn create_default(&self, node: &dyn ConfigurationNode) -> Option<Result<Instance>> {
        let factory = self.default_factory()?;
        Some(factory.create(node).map(Instance::new))
    }
}
