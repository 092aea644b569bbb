//! 组件模块装配
//!
//! 把某个组件类型的配方、工厂集合、管理器、注册表和刷新服务一次装配好。

use crate::binder::BinderFactoryResolver;
use crate::component::factory::{BindingComponentFactory, ComponentFactory, FactorySet};
use crate::component::manager::{Component, ComponentManager};
use crate::component::recipe::Recipe;
use crate::component::refresh::{RefreshService, RefreshSettings};
use crate::config::resolver::TypeConfigurationResolver;
use crate::error::{ConfigError, Result};
use crate::lookup::{InstanceLookup, Registry};
use std::sync::{Arc, Weak};
use tracing::info;

type FactoryBuilder<T> =
    Box<dyn FnOnce(&BinderFactoryResolver, Weak<dyn InstanceLookup>) -> Arc<dyn ComponentFactory<T>>>;

fn deferred<B, T>(recipe: Recipe<B, T>) -> FactoryBuilder<T>
where
    B: Send + 'static,
    T: ?Sized + 'static,
{
    Box::new(
        move |binders: &BinderFactoryResolver, lookup: Weak<dyn InstanceLookup>| {
            Arc::new(BindingComponentFactory::new(recipe, binders).with_lookup(lookup))
                as Arc<dyn ComponentFactory<T>>
        },
    )
}

/// 组件模块构建器
pub struct ComponentModuleBuilder<T: ?Sized> {
    component_type: String,
    resolvers: Arc<dyn TypeConfigurationResolver>,
    recipes: Vec<(String, FactoryBuilder<T>)>,
    default_recipe: Option<FactoryBuilder<T>>,
    registry: Option<Arc<Registry>>,
    binders: BinderFactoryResolver,
    refresh: RefreshSettings,
}

impl<T: Component + ?Sized> ComponentModuleBuilder<T> {
    /// 创建构建器
    ///
    /// # 参数
    /// * `component_type` - 组件类型，配置键形如 `${id}.${component_type}.*`
    /// * `resolvers` - 配置解析器
    pub fn new(
        component_type: impl Into<String>,
        resolvers: Arc<dyn TypeConfigurationResolver>,
    ) -> Self {
        Self {
            component_type: component_type.into(),
            resolvers,
            recipes: Vec::new(),
            default_recipe: None,
            registry: None,
            binders: BinderFactoryResolver::default(),
            refresh: RefreshSettings::default(),
        }
    }

    /// 为类型标识注册配方
    pub fn recipe<B: Send + 'static>(
        mut self,
        discriminator: impl Into<String>,
        recipe: Recipe<B, T>,
    ) -> Self {
        self.recipes.push((discriminator.into(), deferred(recipe)));
        self
    }

    /// 类型标识缺失或无法匹配时使用的配方
    pub fn default_recipe<B: Send + 'static>(mut self, recipe: Recipe<B, T>) -> Self {
        self.default_recipe = Some(deferred(recipe));
        self
    }

    /// 注册已构建的工厂
    pub fn factory(
        mut self,
        discriminator: impl Into<String>,
        factory: Arc<dyn ComponentFactory<T>>,
    ) -> Self {
        let builder: FactoryBuilder<T> =
            Box::new(move |_: &BinderFactoryResolver, _: Weak<dyn InstanceLookup>| factory);
        self.recipes.push((discriminator.into(), builder));
        self
    }

    /// 使用共享注册表，不指定时创建新的注册表
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 使用自定义绑定器工厂集合
    pub fn binders(mut self, binders: BinderFactoryResolver) -> Self {
        self.binders = binders;
        self
    }

    /// 刷新设置
    pub fn refresh(mut self, settings: RefreshSettings) -> Self {
        self.refresh = settings;
        self
    }

    /// 装配模块
    ///
    /// 管理器和工厂集合会登记到注册表，其他模块的引用属性可以通过绑定链找到它们。
    pub fn build(self) -> Result<ComponentModule<T>> {
        if self.component_type.trim().is_empty() {
            return Err(ConfigError::MissingComponentType.into());
        }
        let registry = self.registry.unwrap_or_else(|| Arc::new(Registry::new()));
        let lookup: Arc<dyn InstanceLookup> = Arc::clone(&registry) as Arc<dyn InstanceLookup>;
        let weak = Arc::downgrade(&lookup);

        let mut factories = FactorySet::new();
        for (discriminator, builder) in self.recipes {
            factories.insert(discriminator, builder(&self.binders, weak.clone()));
        }
        if let Some(builder) = self.default_recipe {
            factories.set_default(builder(&self.binders, weak.clone()));
        }
        let factories = Arc::new(factories);

        let manager = Arc::new(ComponentManager::from_type_resolver(
            self.component_type.clone(),
            Arc::clone(&factories),
            self.resolvers.as_ref(),
        )?);
        registry.register_factories::<T>(Arc::clone(&factories));
        registry.register_manager::<T>(Arc::clone(&manager));

        let refresh = self
            .refresh
            .enabled
            .then(|| Arc::new(RefreshService::new(Arc::clone(&manager), self.refresh.clone())));

        info!(
            "组件模块 {} 装配完成，类型: {:?}",
            self.component_type,
            factories.known_types()
        );
        Ok(ComponentModule {
            manager,
            factories,
            registry,
            refresh,
        })
    }
}

/// 装配好的组件模块
pub struct ComponentModule<T: ?Sized> {
    manager: Arc<ComponentManager<T>>,
    factories: Arc<FactorySet<T>>,
    registry: Arc<Registry>,
    refresh: Option<Arc<RefreshService<T>>>,
}

impl<T: Component + ?Sized> ComponentModule<T> {
    /// 组件管理器
    pub fn manager(&self) -> &Arc<ComponentManager<T>> {
        &self.manager
    }

    /// 工厂集合
    pub fn factories(&self) -> &Arc<FactorySet<T>> {
        &self.factories
    }

    /// 注册表
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// 刷新服务，未启用时为 None
    pub fn refresh_service(&self) -> Option<&Arc<RefreshService<T>>> {
        self.refresh.as_ref()
    }

    /// 启动刷新服务（如已启用），必须在 tokio 运行时中调用
    pub fn start(&self) -> bool {
        self.refresh
            .as_ref()
            .is_some_and(|service| service.start())
    }
}
