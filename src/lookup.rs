//! 实例查找
//!
//! 绑定链通过 [`InstanceLookup`] 获取具名单例、按键索引的备选实例、
//! 子类型工厂集合以及组件管理器。[`Registry`] 是进程内的默认实现。

use crate::component::factory::FactorySet;
use crate::component::manager::{Component, ComponentManager};
use crate::config::node::ConfigurationNode;
use crate::error::Result;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// 类型键
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// 获取类型 `T` 的键，`T` 可以是 trait 对象
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// 类型名称
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 类型擦除后的共享实例，内部保存一个 `Arc<U>`
#[derive(Clone)]
pub struct Instance {
    key: TypeKey,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Instance {
    /// 包装共享实例
    pub fn new<U: ?Sized + Send + Sync + 'static>(value: Arc<U>) -> Self {
        Self {
            key: TypeKey::of::<U>(),
            inner: Arc::new(value),
        }
    }

    /// 实例的类型键
    pub fn type_key(&self) -> TypeKey {
        self.key
    }

    /// 取回具体类型，类型不符时返回 None
    pub fn downcast<U: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<U>> {
        self.inner.downcast_ref::<Arc<U>>().cloned()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance<{}>", self.key.name)
    }
}

/// 类表中的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRef {
    /// 配置中使用的名称
    pub name: String,
    /// 对应的 Rust 类型名
    pub type_name: &'static str,
}

/// 类型擦除的组件管理器视图
pub trait ManagedComponents: Send + Sync {
    /// 组件类型
    fn component_type(&self) -> &str;

    /// 按 id 获取（必要时构建）组件
    fn get_instance(&self, id: &str) -> Result<Instance>;

    /// 从节点构建不登记的组件
    fn create_instance(&self, node: &dyn ConfigurationNode) -> Result<Instance>;
}

/// 类型擦除的子类型工厂集合
pub trait SubTypeFactories: Send + Sync {
    /// 按类型标识构建，没有对应工厂时返回 None
    fn create_for(&self, discriminator: &str, node: &dyn ConfigurationNode)
        -> Option<Result<Instance>>;

    /// 用默认工厂构建，没有默认工厂时返回 None
    fn create_default(&self, node: &dyn ConfigurationNode) -> Option<Result<Instance>>;
}

/// 依赖查找契约
pub trait InstanceLookup: Send + Sync {
    /// 具名单例
    fn named(&self, key: TypeKey, name: &str) -> Option<Instance>;

    /// 按键索引的备选实例
    fn keyed(&self, key: TypeKey, map_key: &str) -> Option<Instance>;

    /// 类型对应的组件管理器
    fn manager(&self, key: TypeKey) -> Option<Arc<dyn ManagedComponents>>;

    /// 类型对应的子类型工厂集合
    fn sub_factories(&self, key: TypeKey) -> Option<Arc<dyn SubTypeFactories>>;

    /// 类表查找
    fn class(&self, name: &str) -> Option<ClassRef>;
}

/// 不提供任何实例的查找
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyLookup;

impl InstanceLookup for EmptyLookup {
    fn named(&self, _key: TypeKey, _name: &str) -> Option<Instance> {
        None
    }

    fn keyed(&self, _key: TypeKey, _map_key: &str) -> Option<Instance> {
        None
    }

    fn manager(&self, _key: TypeKey) -> Option<Arc<dyn ManagedComponents>> {
        None
    }

    fn sub_factories(&self, _key: TypeKey) -> Option<Arc<dyn SubTypeFactories>> {
        None
    }

    fn class(&self, _name: &str) -> Option<ClassRef> {
        None
    }
}

struct ManagerEntry {
    erased: Arc<dyn ManagedComponents>,
    typed: Instance,
}

/// 进程内实例注册表
#[derive(Default)]
pub struct Registry {
    named: RwLock<HashMap<(TypeKey, String), Instance>>,
    keyed: RwLock<HashMap<TypeKey, BTreeMap<String, Instance>>>,
    managers: RwLock<HashMap<TypeKey, ManagerEntry>>,
    factories: RwLock<HashMap<TypeKey, Arc<dyn SubTypeFactories>>>,
    classes: RwLock<HashMap<String, ClassRef>>,
}

impl Registry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册具名单例
    ///
    /// # 参数
    /// * `name` - 配置中引用的名称
    /// * `value` - 实例
    pub fn register_named<U: ?Sized + Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
        value: Arc<U>,
    ) {
        let name = name.into();
        debug!("注册具名实例: {} ({})", name, std::any::type_name::<U>());
        self.named
            .write()
            .insert((TypeKey::of::<U>(), name), Instance::new(value));
    }

    /// 注册按键索引的备选实例
    pub fn register_keyed<U: ?Sized + Send + Sync + 'static>(
        &self,
        key: impl Into<String>,
        value: Arc<U>,
    ) {
        self.keyed
            .write()
            .entry(TypeKey::of::<U>())
            .or_default()
            .insert(key.into(), Instance::new(value));
    }

    /// 注册子类型工厂集合
    pub fn register_factories<U: ?Sized + Send + Sync + 'static>(
        &self,
        factories: Arc<FactorySet<U>>,
    ) {
        debug!(
            "注册子类型工厂: {} ({:?})",
            std::any::type_name::<U>(),
            factories.known_types()
        );
        self.factories
            .write()
            .insert(TypeKey::of::<U>(), factories);
    }

    /// 注册组件管理器
    pub fn register_manager<U: Component + ?Sized>(&self, manager: Arc<ComponentManager<U>>) {
        debug!("注册组件管理器: {}", manager.component_type());
        let entry = ManagerEntry {
            erased: Arc::clone(&manager) as Arc<dyn ManagedComponents>,
            typed: Instance::new(manager),
        };
        self.managers.write().insert(TypeKey::of::<U>(), entry);
    }

    /// 注册类表条目
    pub fn register_class<C: ?Sized + 'static>(&self, name: impl Into<String>) {
        let name = name.into();
        let class = ClassRef {
            name: name.clone(),
            type_name: std::any::type_name::<C>(),
        };
        self.classes.write().insert(name, class);
    }

    /// 按名称取回具名单例
    pub fn named_instance<U: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Option<Arc<U>> {
        self.named(TypeKey::of::<U>(), name)
            .and_then(|instance| instance.downcast::<U>())
    }

    /// 按键取回备选实例
    pub fn keyed_instance<U: ?Sized + Send + Sync + 'static>(&self, key: &str) -> Option<Arc<U>> {
        self.keyed(TypeKey::of::<U>(), key)
            .and_then(|instance| instance.downcast::<U>())
    }

    /// 取回类型化的组件管理器
    pub fn manager_for<U: Component + ?Sized>(&self) -> Option<Arc<ComponentManager<U>>> {
        self.managers
            .read()
            .get(&TypeKey::of::<U>())
            .and_then(|entry| entry.typed.downcast::<ComponentManager<U>>())
    }
}

impl InstanceLookup for Registry {
    fn named(&self, key: TypeKey, name: &str) -> Option<Instance> {
        self.named.read().get(&(key, name.to_string())).cloned()
    }

    fn keyed(&self, key: TypeKey, map_key: &str) -> Option<Instance> {
        self.keyed
            .read()
            .get(&key)
            .and_then(|entries| entries.get(map_key).cloned())
    }

    fn manager(&self, key: TypeKey) -> Option<Arc<dyn ManagedComponents>> {
        self.managers
            .read()
            .get(&key)
            .map(|entry| Arc::clone(&entry.erased))
    }

    fn sub_factories(&self, key: TypeKey) -> Option<Arc<dyn SubTypeFactories>> {
        self.factories.read().get(&key).cloned()
    }

    fn class(&self, name: &str) -> Option<ClassRef> {
        self.classes.read().get(name).cloned()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("named", &self.named.read().len())
            .field("keyed", &self.keyed.read().len())
            .field("managers", &self.managers.read().len())
            .field("factories", &self.factories.read().len())
            .field("classes", &self.classes.read().len())
            .finish()
    }
}
