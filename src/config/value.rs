//! 配置值类型
//!
//! 定义配置节点可读取的值类型以及类型转换

use crate::error::ConfigError;
use std::collections::BTreeMap;
use std::fmt;

/// 配置节点支持的值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// 字符串
    String,
    /// 32位整数
    Integer,
    /// 64位整数
    Long,
    /// 浮点数
    Double,
    /// 布尔值
    Boolean,
    /// 子树展开后的键值映射
    Properties,
}

impl ValueKind {
    /// 类型名称，用于错误信息
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Integer => "i32",
            ValueKind::Long => "i64",
            ValueKind::Double => "f64",
            ValueKind::Boolean => "bool",
            ValueKind::Properties => "properties",
        }
    }

    /// 是否为单值类型
    pub fn is_scalar(&self) -> bool {
        !matches!(self, ValueKind::Properties)
    }

    /// 将文本解析为指定类型的值
    ///
    /// # 参数
    /// * `path` - 配置路径，用于错误信息
    /// * `text` - 原始文本
    ///
    /// # 返回
    /// * `Result<Value, ConfigError>` - 解析结果
    pub fn parse(&self, path: &str, text: &str) -> Result<Value, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            path: path.to_string(),
            expected: self.name(),
            value: text.to_string(),
        };
        let trimmed = text.trim();
        match self {
            ValueKind::String => Ok(Value::String(text.to_string())),
            ValueKind::Integer => trimmed.parse().map(Value::Integer).map_err(|_| invalid()),
            ValueKind::Long => trimmed.parse().map(Value::Long).map_err(|_| invalid()),
            ValueKind::Double => trimmed.parse().map(Value::Double).map_err(|_| invalid()),
            // 与 Boolean.valueOf 一致：只有 "true"（忽略大小写）为真
            ValueKind::Boolean => Ok(Value::Boolean(trimmed.eq_ignore_ascii_case("true"))),
            ValueKind::Properties => Err(invalid()),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 已读取的配置值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i32),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Properties(BTreeMap<String, String>),
}

impl Value {
    /// 值的类型
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Integer(_) => ValueKind::Integer,
            Value::Long(_) => ValueKind::Long,
            Value::Double(_) => ValueKind::Double,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Properties(_) => ValueKind::Properties,
        }
    }
}

/// 可从 [`Value`] 中取出的 Rust 类型
pub trait FromValue: Sized + Send + Sync + 'static {
    /// 对应的值类型
    const KIND: ValueKind;

    /// 从值中取出，类型不匹配时返回 None
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_from_value {
    ($ty:ty, $kind:ident) => {
        impl FromValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$kind(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_from_value!(String, String);
impl_from_value!(i32, Integer);
impl_from_value!(i64, Long);
impl_from_value!(f64, Double);
impl_from_value!(bool, Boolean);
impl_from_value!(BTreeMap<String, String>, Properties);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(
            ValueKind::Integer.parse("a.b", " 42 ").unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            ValueKind::Long.parse("a.b", "9000000000").unwrap(),
            Value::Long(9_000_000_000)
        );
        assert_eq!(
            ValueKind::Double.parse("a.b", "1.5").unwrap(),
            Value::Double(1.5)
        );
    }

    #[test]
    fn test_parse_invalid_number() {
        let err = ValueKind::Integer.parse("id1.widget.count", "many").unwrap_err();
        assert!(err.to_string().contains("id1.widget.count"));
    }

    #[test]
    fn test_parse_boolean_is_lenient() {
        assert_eq!(
            ValueKind::Boolean.parse("p", "TRUE").unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            ValueKind::Boolean.parse("p", "yes").unwrap(),
            Value::Boolean(false)
        );
    }

    #[test]
    fn test_from_value_mismatch() {
        assert_eq!(i32::from_value(Value::Integer(3)), Some(3));
        assert_eq!(i32::from_value(Value::Long(3)), None);
    }
}
