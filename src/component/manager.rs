//! 组件管理器
//!
//! 按 id 持有组件实例：首次 `get` 时按配置构建（同一 id 至多构建一次），
//! 支持显式添加、替换、移除，并在实例生效前后调用生命周期钩子。
//!
//! 所有修改操作共用一个可重入互斥锁；缓存命中的读取不加锁。
//! 锁是可重入的，因此 `apply` 中的代码以及构建过程中引用同类型其他组件的
//! 属性都可以重新进入管理器。正在按 id 构建的组件会被记录，
//! 引用链回到自身时返回构建错误。

use crate::component::factory::FactorySet;
use crate::config::node::ConfigurationNode;
use crate::config::resolver::{ComponentConfigurationResolver, TypeConfigurationResolver};
use crate::error::{ForgeError, Result};
use crate::lookup::{Instance, ManagedComponents};
use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// 组件生命周期钩子
pub trait Component: Send + Sync + 'static {
    /// 实例对外可见之前调用，失败时实例不会被登记
    fn post_construct(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 实例不再可见之后调用，错误只记录日志
    fn pre_destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 组件变更事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentEvent {
    /// 新增
    Added { id: String },
    /// 替换了已有实例
    Replaced { id: String },
    /// 移除
    Removed { id: String },
}

impl ComponentEvent {
    /// 事件涉及的 id
    pub fn id(&self) -> &str {
        match self {
            ComponentEvent::Added { id }
            | ComponentEvent::Replaced { id }
            | ComponentEvent::Removed { id } => id,
        }
    }
}

/// 组件管理器
pub struct ComponentManager<T: ?Sized> {
    /// 组件类型
    component_type: String,
    /// id → 当前实例
    registry: DashMap<String, Arc<T>>,
    /// 按类型标识选择的工厂
    factories: Arc<FactorySet<T>>,
    /// 配置解析器
    resolver: Arc<dyn ComponentConfigurationResolver>,
    /// 修改操作的互斥域
    lock: ReentrantMutex<()>,
    /// 正在构建的 id，只在持有互斥锁时修改
    building: Mutex<HashSet<String>>,
    /// 事件发送器
    event_sender: broadcast::Sender<ComponentEvent>,
}

impl<T: Component + ?Sized> ComponentManager<T> {
    /// 创建组件管理器
    ///
    /// # 参数
    /// * `component_type` - 组件类型，用于配置命名约定和错误信息
    /// * `factories` - 工厂集合
    /// * `resolver` - 该类型的配置解析器
    pub fn new(
        component_type: impl Into<String>,
        factories: Arc<FactorySet<T>>,
        resolver: Arc<dyn ComponentConfigurationResolver>,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(64);
        Self {
            component_type: component_type.into(),
            registry: DashMap::new(),
            factories,
            resolver,
            lock: ReentrantMutex::new(()),
            building: Mutex::new(HashSet::new()),
            event_sender,
        }
    }

    /// 通过类型解析器获取配置解析器并创建管理器
    pub fn from_type_resolver(
        component_type: impl Into<String>,
        factories: Arc<FactorySet<T>>,
        resolvers: &dyn TypeConfigurationResolver,
    ) -> Result<Self> {
        let component_type = component_type.into();
        let resolver = resolvers.resolver_for(&component_type)?;
        Ok(Self::new(component_type, factories, resolver))
    }

    /// 组件类型
    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    /// 工厂集合
    pub fn factories(&self) -> &Arc<FactorySet<T>> {
        &self.factories
    }

    /// 配置解析器
    pub fn resolver(&self) -> &Arc<dyn ComponentConfigurationResolver> {
        &self.resolver
    }

    /// 获取组件，不存在时按配置构建
    ///
    /// 并发请求同一个尚未构建的 id 时只会构建一次，其余调用方等待并得到同一实例。
    ///
    /// # 返回
    /// * `Err(ConfigurationMissing)` - 没有该 id 的配置
    /// * `Err(TypeResolution)` - 没有匹配的工厂且没有默认工厂
    /// * `Err(Construction)` - 构建失败，包括引用链回到正在构建的 id
    pub fn get(&self, id: &str) -> Result<Arc<T>> {
        if let Some(component) = self.find(id) {
            return Ok(component);
        }

        let _guard = self.lock.lock();
        if let Some(component) = self.find(id) {
            return Ok(component);
        }

        let node = self
            .resolver
            .configuration(id)?
            .ok_or_else(|| ForgeError::ConfigurationMissing {
                component_type: self.component_type.clone(),
                id: id.to_string(),
            })?;
        let component = self.build_tracked(id, node.as_ref())?;
        self.install(id, Arc::clone(&component))?;
        Ok(component)
    }

    /// 查找已存在的组件，不会触发构建
    pub fn find(&self, id: &str) -> Option<Arc<T>> {
        self.registry.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// 是否存在
    pub fn contains(&self, id: &str) -> bool {
        self.registry.contains_key(id)
    }

    /// 已登记的 id，已排序
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// 已登记组件数量
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// 是否没有任何组件
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// 全部组件的快照
    pub fn snapshot(&self) -> HashMap<String, Arc<T>> {
        self.registry
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    /// 订阅组件变更事件
    pub fn subscribe(&self) -> broadcast::Receiver<ComponentEvent> {
        self.event_sender.subscribe()
    }

    /// 登记外部构建的组件，id 已存在时失败
    pub fn add(&self, id: &str, component: Arc<T>) -> Result<()> {
        let _guard = self.lock.lock();
        self.ensure_absent(id)?;
        self.install(id, component)
    }

    /// 从节点构建并登记，id 已存在时失败
    pub fn load(&self, node: &dyn ConfigurationNode) -> Result<Arc<T>> {
        let id = self.require_id(node)?;
        let _guard = self.lock.lock();
        self.ensure_absent(&id)?;
        let component = self.build_tracked(&id, node)?;
        self.install(&id, Arc::clone(&component))?;
        Ok(component)
    }

    /// 从节点构建并登记，覆盖已有实例
    pub fn replace_from(&self, node: &dyn ConfigurationNode) -> Result<Arc<T>> {
        let id = self.require_id(node)?;
        let _guard = self.lock.lock();
        let component = self.build_tracked(&id, node)?;
        self.install(&id, Arc::clone(&component))?;
        Ok(component)
    }

    /// 登记外部构建的组件，覆盖已有实例
    pub fn replace(&self, id: &str, component: Arc<T>) -> Result<()> {
        let _guard = self.lock.lock();
        self.install(id, component)
    }

    /// 从节点构建组件但不登记
    pub fn create(&self, node: &dyn ConfigurationNode) -> Result<Arc<T>> {
        let component = self.build(node)?;
        component
            .post_construct()
            .map_err(|e| ForgeError::construction(&self.component_type, node.id(), e))?;
        Ok(component)
    }

    /// 移除组件，id 不存在时不做任何事
    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        let _guard = self.lock.lock();
        let (_, removed) = self.registry.remove(id)?;
        info!("移除组件 {}: {}", self.component_type, id);
        self.destroy(id, &removed);
        self.publish(ComponentEvent::Removed { id: id.to_string() });
        Some(removed)
    }

    /// 在管理器的互斥域内执行操作
    pub fn apply<R>(&self, operation: impl FnOnce() -> R) -> R {
        let _guard = self.lock.lock();
        operation()
    }

    fn require_id(&self, node: &dyn ConfigurationNode) -> Result<String> {
        node.id()
            .map(str::to_string)
            .ok_or_else(|| ForgeError::MissingId {
                component_type: self.component_type.clone(),
            })
    }

    fn ensure_absent(&self, id: &str) -> Result<()> {
        if self.contains(id) {
            return Err(ForgeError::AlreadyExists {
                component_type: self.component_type.clone(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // 调用方必须持有互斥锁
    fn build_tracked(&self, id: &str, node: &dyn ConfigurationNode) -> Result<Arc<T>> {
        if !self.building.lock().insert(id.to_string()) {
            return Err(ForgeError::construction(
                &self.component_type,
                Some(id),
                anyhow::anyhow!("检测到循环引用: '{}' 正在构建中", id),
            ));
        }
        let _building = BuildingGuard {
            building: &self.building,
            id,
        };
        self.build(node)
    }

    fn build(&self, node: &dyn ConfigurationNode) -> Result<Arc<T>> {
        let declared = node.declared_type();
        let factory =
            self.factories
                .select(declared)
                .ok_or_else(|| ForgeError::TypeResolution {
                    component_type: self.component_type.clone(),
                    requested: declared.map(str::to_string),
                    known: self.factories.known_types(),
                })?;
        debug!(
            "构建组件 {} (id: {:?}, 类型: {:?}) 使用 {}",
            self.component_type,
            node.id(),
            declared,
            factory.raw_type()
        );
        factory.create(node)
    }

    // 调用方必须持有互斥锁
    fn install(&self, id: &str, component: Arc<T>) -> Result<()> {
        component
            .post_construct()
            .map_err(|e| ForgeError::construction(&self.component_type, Some(id), e))?;

        let previous = self.registry.insert(id.to_string(), Arc::clone(&component));
        match previous {
            Some(old) => {
                info!("替换组件 {}: {}", self.component_type, id);
                if !Arc::ptr_eq(&old, &component) {
                    self.destroy(id, &old);
                }
                self.publish(ComponentEvent::Replaced { id: id.to_string() });
            }
            None => {
                info!("添加组件 {}: {}", self.component_type, id);
                self.publish(ComponentEvent::Added { id: id.to_string() });
            }
        }
        Ok(())
    }

    fn destroy(&self, id: &str, component: &Arc<T>) {
        if let Err(e) = component.pre_destroy() {
            error!("销毁组件 {} ({}) 失败: {:#}", self.component_type, id, e);
        }
    }

    fn publish(&self, event: ComponentEvent) {
        // 没有订阅者时发送失败是正常情况
        let _ = self.event_sender.send(event);
    }
}

/// 离开作用域时把 id 移出构建集合，构建失败时同样生效
struct BuildingGuard<'a> {
    building: &'a Mutex<HashSet<String>>,
    id: &'a str,
}

impl Drop for BuildingGuard<'_> {
    fn drop(&mut self) {
        self.building.lock().remove(self.id);
    }
}

impl<T: ?Sized> fmt::Debug for ComponentManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentManager")
            .field("component_type", &self.component_type)
            .field("components", &self.registry.len())
            .field("factories", &self.factories)
            .finish()
    }
}

impl<T: Component + ?Sized> ManagedComponents for ComponentManager<T> {
    fn component_type(&self) -> &str {
        &self.component_type
    }

    fn get_instance(&self, id: &str) -> Result<Instance> {
        self.get(id).map(Instance::new)
    }

    fn create_instance(&self, node: &dyn ConfigurationNode) -> Result<Instance> {
        self.create(node).map(Instance::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::BinderFactoryResolver;
    use crate::component::factory::{BindingComponentFactory, ComponentFactory};
    use crate::component::recipe::Recipe;
    use crate::config::json::JsonNode;
    use crate::config::properties::PropertiesSource;
    use crate::config::resolver::PropertiesTypeConfigurationResolver;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Counter {
        name: String,
        destroyed: AtomicUsize,
        fail_on_start: bool,
    }

    impl Component for Counter {
        fn post_construct(&self) -> anyhow::Result<()> {
            if self.fail_on_start {
                anyhow::bail!("refusing to start");
            }
            Ok(())
        }

        fn pre_destroy(&self) -> anyhow::Result<()> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CounterBuilder {
        name: String,
        fail_on_start: bool,
    }

    fn manager(pairs: &[(&str, &str)]) -> ComponentManager<Counter> {
        let recipe = Recipe::new(|b: CounterBuilder| {
            Ok(Arc::new(Counter {
                name: b.name,
                fail_on_start: b.fail_on_start,
                ..Counter::default()
            }))
        })
        .value("name", |b: &mut CounterBuilder, v: String| b.name = v)
        .value("failOnStart", |b: &mut CounterBuilder, v: bool| b.fail_on_start = v);
        let factory: Arc<dyn ComponentFactory<Counter>> = Arc::new(BindingComponentFactory::new(
            recipe,
            &BinderFactoryResolver::default(),
        ));
        let factories = FactorySet::new().with("a", factory);

        let source = Arc::new(PropertiesSource::from_pairs(pairs.iter().copied()));
        ComponentManager::from_type_resolver(
            "counter",
            Arc::new(factories),
            &PropertiesTypeConfigurationResolver::new(source),
        )
        .unwrap()
    }

    fn counter(name: &str) -> Arc<Counter> {
        Arc::new(Counter {
            name: name.to_string(),
            ..Counter::default()
        })
    }

    #[test]
    fn test_get_builds_once_and_caches() {
        let manager = manager(&[("c1.counter.type", "a"), ("c1.counter.name", "one")]);
        assert!(manager.find("c1").is_none());

        let first = manager.get("c1").unwrap();
        let second = manager.get("c1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name, "one");
        assert_eq!(manager.ids(), vec!["c1".to_string()]);
    }

    #[test]
    fn test_get_missing_configuration() {
        let manager = manager(&[]);
        assert!(matches!(
            manager.get("nope"),
            Err(ForgeError::ConfigurationMissing { .. })
        ));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_add_collision_and_replace() {
        let manager = manager(&[]);
        let x = counter("x");
        manager.add("id", Arc::clone(&x)).unwrap();
        assert!(matches!(
            manager.add("id", counter("y")),
            Err(ForgeError::AlreadyExists { .. })
        ));

        let y = counter("y");
        manager.replace("id", Arc::clone(&y)).unwrap();
        assert!(Arc::ptr_eq(&manager.find("id").unwrap(), &y));
        assert_eq!(x.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_runs_teardown_once() {
        let manager = manager(&[]);
        let x = counter("x");
        manager.add("id", Arc::clone(&x)).unwrap();
        assert!(manager.remove("id").is_some());
        assert!(manager.remove("id").is_none());
        assert!(manager.find("id").is_none());
        assert_eq!(x.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_post_construct_is_not_installed() {
        let manager = manager(&[("c1.counter.type", "a"), ("c1.counter.failOnStart", "true")]);
        assert!(matches!(
            manager.get("c1"),
            Err(ForgeError::Construction { .. })
        ));
        assert!(!manager.contains("c1"));
    }

    #[test]
    fn test_load_and_replace_from_node() {
        let manager = manager(&[]);
        let node = JsonNode::new(Some("j1".into()), Some("a".into()), "j1", json!({"name": "first"}));
        manager.load(&node).unwrap();
        assert!(matches!(
            manager.load(&node),
            Err(ForgeError::AlreadyExists { .. })
        ));

        let node = JsonNode::new(Some("j1".into()), Some("a".into()), "j1", json!({"name": "second"}));
        let replaced = manager.replace_from(&node).unwrap();
        assert_eq!(replaced.name, "second");
        assert_eq!(manager.find("j1").unwrap().name, "second");

        let anonymous = JsonNode::new(None, Some("a".into()), "anon", json!({}));
        assert!(matches!(
            manager.load(&anonymous),
            Err(ForgeError::MissingId { .. })
        ));
        assert!(manager.create(&anonymous).is_ok());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_events() {
        let manager = manager(&[]);
        let mut events = manager.subscribe();
        manager.add("id", counter("x")).unwrap();
        manager.replace("id", counter("y")).unwrap();
        manager.remove("id");

        assert_eq!(events.try_recv().unwrap(), ComponentEvent::Added { id: "id".into() });
        assert_eq!(events.try_recv().unwrap(), ComponentEvent::Replaced { id: "id".into() });
        assert_eq!(events.try_recv().unwrap().id(), "id");
    }

    #[test]
    fn test_apply_is_reentrant() {
        let manager = manager(&[]);
        manager.apply(|| {
            manager.add("inner", counter("x")).unwrap();
        });
        assert!(manager.contains("inner"));
    }
}
