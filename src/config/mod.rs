//! 配置模块
//!
//! 提供配置节点抽象、配置源、按命名约定的解析器以及文件热重载

pub mod dynamic;
pub mod json;
pub mod loader;
pub mod node;
pub mod properties;
pub mod resolver;
pub mod value;
pub mod watcher;

// 重新导出主要类型
pub use dynamic::{ChangeCallback, Dynamic, DynamicWithDefault, Subscription};
pub use json::JsonNode;
pub use loader::{FileSourceLoader, SourceFormat, SourceLoader};
pub use node::{ConfigurationNode, ConfigurationNodeExt, Fingerprint};
pub use properties::{PropertiesNode, PropertiesSource, TYPE_FIELD};
pub use resolver::{
    ComponentConfigurationResolver, PropertiesComponentResolver,
    PropertiesTypeConfigurationResolver, StaticConfigurationResolver, TypeConfigurationResolver,
};
pub use value::{FromValue, Value, ValueKind};
pub use watcher::{SourceChangeEvent, SourceWatcher};
