//! 内置绑定器工厂

use super::{binder_fn, Bound, PropertyBinder, PropertyBinderFactory, PropertyShape};
use crate::config::dynamic::Dynamic;
use crate::config::node::ConfigurationNodeExt;
use crate::config::value::ValueKind;
use crate::error::ForgeError;
use std::sync::Arc;

/// 单一字面量类型的绑定器工厂
#[derive(Debug, Clone, Copy)]
pub struct ValueBinderFactory {
    kind: ValueKind,
}

impl ValueBinderFactory {
    /// 创建处理 `kind` 的工厂
    pub fn new(kind: ValueKind) -> Self {
        Self { kind }
    }
}

impl PropertyBinderFactory for ValueBinderFactory {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn create(&self, shape: &PropertyShape) -> Option<Arc<dyn PropertyBinder>> {
        match shape {
            PropertyShape::Value(kind) if *kind == self.kind && kind.is_scalar() => {
                let kind = *kind;
                Some(binder_fn(move |_, node| {
                    Ok(node.value(kind)?.map(Bound::Value))
                }))
            }
            _ => None,
        }
    }
}

/// 子树映射绑定器工厂
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertiesBinderFactory;

impl PropertyBinderFactory for PropertiesBinderFactory {
    fn name(&self) -> &'static str {
        "properties"
    }

    fn create(&self, shape: &PropertyShape) -> Option<Arc<dyn PropertyBinder>> {
        match shape {
            PropertyShape::Value(ValueKind::Properties) => Some(binder_fn(|_, node| {
                Ok(node.value(ValueKind::Properties)?.map(Bound::Value))
            })),
            _ => None,
        }
    }
}

/// 动态值绑定器工厂
///
/// 只有当前能读到值时才绑定，避免用空的动态值覆盖构建器的默认值。
/// 配置源不支持变更通知时，用当前静态值包装成不会变化的动态值。
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicBinderFactory;

impl PropertyBinderFactory for DynamicBinderFactory {
    fn name(&self) -> &'static str {
        "dynamic"
    }

    fn create(&self, shape: &PropertyShape) -> Option<Arc<dyn PropertyBinder>> {
        let PropertyShape::Dynamic(kind) = shape else {
            return None;
        };
        let kind = *kind;
        Some(binder_fn(move |_, node| {
            if let Some(dynamic) = node.dynamic_value(kind) {
                return Ok(dynamic.value().is_some().then_some(Bound::Dynamic(dynamic)));
            }
            Ok(node
                .value(kind)?
                .map(|value| Bound::Dynamic(Dynamic::fixed(Some(value)))))
        }))
    }
}

/// 枚举绑定器工厂
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumBinderFactory;

impl PropertyBinderFactory for EnumBinderFactory {
    fn name(&self) -> &'static str {
        "enum"
    }

    fn create(&self, shape: &PropertyShape) -> Option<Arc<dyn PropertyBinder>> {
        let PropertyShape::Enum { type_name, parse } = shape else {
            return None;
        };
        let type_name = *type_name;
        let parse = Arc::clone(parse);
        Some(binder_fn(move |_, node| {
            let Some(text) = node.get_value::<String>()? else {
                return Ok(None);
            };
            let instance = parse(text.trim()).map_err(|e| ForgeError::Binding {
                property: node.path().to_string(),
                source: e.context(format!("'{}' 不是有效的 {}", text, type_name)),
            })?;
            Ok(Some(Bound::Instance(instance)))
        }))
    }
}

/// 类表引用绑定器工厂
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassBinderFactory;

impl PropertyBinderFactory for ClassBinderFactory {
    fn name(&self) -> &'static str {
        "class"
    }

    fn create(&self, shape: &PropertyShape) -> Option<Arc<dyn PropertyBinder>> {
        if !matches!(shape, PropertyShape::Class) {
            return None;
        }
        Some(binder_fn(|lookup, node| {
            let Some(name) = node.get_value::<String>()? else {
                return Ok(None);
            };
            let name = name.trim();
            match lookup.class(name) {
                Some(class) => Ok(Some(Bound::Class(class))),
                None => Err(ForgeError::Binding {
                    property: node.path().to_string(),
                    source: anyhow::anyhow!("未知的类: {}", name),
                }),
            }
        }))
    }
}
