//! 组件构建与生命周期
//!
//! 配方描述如何从配置构建组件，工厂执行构建，管理器按 id 持有实例，
//! 刷新服务让管理器跟随配置变化。

pub mod factory;
pub mod manager;
pub mod module;
pub mod recipe;
pub mod refresh;

// 重新导出主要类型
pub use factory::{BindingComponentFactory, ComponentFactory, FactorySet};
pub use manager::{Component, ComponentEvent, ComponentManager};
pub use module::{ComponentModule, ComponentModuleBuilder};
pub use recipe::{PropertyDescriptor, PropertyInfo, Recipe};
pub use refresh::{RefreshReport, RefreshService, RefreshSettings, Snapshot, SnapshotDiff};
