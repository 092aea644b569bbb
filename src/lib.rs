//! Component Forge - 配置驱动的组件构建与生命周期引擎
//!
//! 根据分层、可动态变化的配置和按类型注册的组件配方，按 id 构建、缓存、
//! 热替换和销毁组件实例：
//! - 配置节点抽象（静态值、动态值、子节点导航）
//! - 按属性形态选择的绑定器与引用绑定链
//! - 同一 id 至多构建一次的组件管理器及生命周期钩子
//! - 周期刷新与配置文件热重载
//! - 结构化日志记录

pub mod binder;
pub mod binding;
pub mod component;
pub mod config;
pub mod error;
pub mod logging;
pub mod lookup;

// 重新导出主要类型
pub use component::{
    Component, ComponentEvent, ComponentFactory, ComponentManager, ComponentModule,
    ComponentModuleBuilder, FactorySet, Recipe, RefreshService, RefreshSettings,
};
pub use config::{
    ConfigurationNode, ConfigurationNodeExt, Dynamic, DynamicWithDefault, PropertiesSource,
    PropertiesTypeConfigurationResolver, Subscription,
};
pub use error::{ConfigError, ForgeError, Result};
pub use lookup::{InstanceLookup, Registry};

/// 版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
