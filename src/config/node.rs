//! 配置节点抽象
//!
//! 配置节点是配置树中一个可寻址的位置，提供按类型读取值、
//! 动态值订阅、子节点导航和结构判断。

use crate::config::dynamic::Dynamic;
use crate::config::value::{FromValue, Value, ValueKind};
use crate::error::ConfigError;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// 节点相等性依据：id + 类型标识 + 底层数据
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    /// 组件 id
    pub id: Option<String>,
    /// 类型标识
    pub declared_type: Option<String>,
    /// 节点范围内的数据
    pub data: serde_json::Value,
}

/// 配置节点
///
/// `child` 不会修改底层配置，每次返回一个新的、深一层的独立节点。
/// 节点自身不做缓存，缓存由调用方负责。
pub trait ConfigurationNode: Send + Sync + fmt::Debug {
    /// 组件 id，非根节点可能没有
    fn id(&self) -> Option<&str>;

    /// 类型标识，用于选择具体实现
    fn declared_type(&self) -> Option<&str>;

    /// 节点路径，仅用于诊断
    fn path(&self) -> &str;

    /// 读取节点自身位置的值
    ///
    /// # 返回
    /// * `Ok(None)` - 值不存在或该类型无法表示
    /// * `Err(ConfigError)` - 值存在但无法转换
    fn value(&self, kind: ValueKind) -> Result<Option<Value>, ConfigError>;

    /// 读取动态值，配置源不支持变更通知时返回 None
    fn dynamic_value(&self, kind: ValueKind) -> Option<Dynamic<Value>>;

    /// 子节点，名称下没有任何配置时返回 None
    fn child(&self, name: &str) -> Option<Arc<dyn ConfigurationNode>>;

    /// 节点是否为单值（而非嵌套结构）
    fn is_single(&self) -> bool;

    /// 名称下是否存在配置
    fn has_child(&self, name: &str) -> bool;

    /// 节点中存在但不在 `supported` 中的属性名
    fn unknown_properties(&self, supported: &BTreeSet<String>) -> BTreeSet<String>;

    /// 相等性比较使用的指纹
    fn fingerprint(&self) -> Fingerprint;
}

impl PartialEq for dyn ConfigurationNode {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

/// 带类型参数的便捷读取方法
pub trait ConfigurationNodeExt {
    /// 按类型读取值
    fn get_value<T: FromValue>(&self) -> Result<Option<T>, ConfigError>;

    /// 按类型读取动态值
    fn get_dynamic_value<T: FromValue>(&self) -> Option<Dynamic<T>>;
}

impl<N: ConfigurationNode + ?Sized> ConfigurationNodeExt for N {
    fn get_value<T: FromValue>(&self) -> Result<Option<T>, ConfigError> {
        Ok(self.value(T::KIND)?.and_then(T::from_value))
    }

    fn get_dynamic_value<T: FromValue>(&self) -> Option<Dynamic<T>> {
        self.dynamic_value(T::KIND)
            .map(|dynamic| dynamic.map(T::from_value))
    }
}
