//! 组件配方
//!
//! 配方显式列出构建器 `B` 的可设置属性以及每个属性接受的形态，
//! 取代运行时反射。同一类型的配方只在创建工厂时编译一次。

use crate::binder::{BinderFactoryResolver, BinderSlot, Bound, PropertyBinder, PropertyShape};
use crate::config::dynamic::Dynamic;
use crate::config::node::ConfigurationNode;
use crate::config::value::{FromValue, Value};
use crate::error::{ForgeError, Result};
use crate::lookup::{ClassRef, Instance, InstanceLookup, TypeKey};
use anyhow::anyhow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// 把绑定结果写入构建器
pub type Setter<B> = Arc<dyn Fn(&mut B, Bound) -> anyhow::Result<()> + Send + Sync>;

/// 创建新的构建器实例
pub type Instantiator<B> =
    Arc<dyn Fn(&dyn InstanceLookup, &dyn ConfigurationNode) -> anyhow::Result<B> + Send + Sync>;

/// 设置组件 id
pub type IdSetter<B> = Arc<dyn Fn(&mut B, &str) + Send + Sync>;

/// 由构建器生成最终组件
pub type Finisher<B, T> = Arc<dyn Fn(B) -> anyhow::Result<Arc<T>> + Send + Sync>;

/// 一条属性声明
pub struct PropertyDeclaration<B> {
    name: String,
    shape: PropertyShape,
    setter: Setter<B>,
}

impl<B> PropertyDeclaration<B> {
    /// 属性名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 接受的形态
    pub fn shape(&self) -> &PropertyShape {
        &self.shape
    }
}

/// 组件配方
pub struct Recipe<B, T: ?Sized> {
    raw_type: &'static str,
    instantiator: Instantiator<B>,
    id_setter: Option<IdSetter<B>>,
    declarations: Vec<PropertyDeclaration<B>>,
    finisher: Finisher<B, T>,
}

impl<B, T> Recipe<B, T>
where
    B: Send + 'static,
    T: ?Sized + 'static,
{
    /// 以 `B::default()` 创建构建器的配方
    ///
    /// # 参数
    /// * `build` - 由构建器生成组件
    pub fn new<F>(build: F) -> Self
    where
        B: Default,
        F: Fn(B) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        Self::with_instantiator(|_, _| Ok(B::default()), build)
    }

    /// 使用自定义实例化方式的配方，实例化时可以访问查找契约和配置节点
    pub fn with_instantiator<I, F>(instantiator: I, build: F) -> Self
    where
        I: Fn(&dyn InstanceLookup, &dyn ConfigurationNode) -> anyhow::Result<B>
            + Send
            + Sync
            + 'static,
        F: Fn(B) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            raw_type: std::any::type_name::<B>(),
            instantiator: Arc::new(instantiator),
            id_setter: None,
            declarations: Vec::new(),
            finisher: Arc::new(build),
        }
    }

    /// 设置 id 的方法
    pub fn id<F>(mut self, setter: F) -> Self
    where
        F: Fn(&mut B, &str) + Send + Sync + 'static,
    {
        self.id_setter = Some(Arc::new(setter));
        self
    }

    /// 声明任意形态的属性
    pub fn property<F>(mut self, name: impl Into<String>, shape: PropertyShape, setter: F) -> Self
    where
        F: Fn(&mut B, Bound) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.declarations.push(PropertyDeclaration {
            name: name.into(),
            shape,
            setter: Arc::new(setter),
        });
        self
    }

    /// 字面量属性（字符串、数字、布尔、属性映射）
    pub fn value<V, F>(self, name: impl Into<String>, setter: F) -> Self
    where
        V: FromValue,
        F: Fn(&mut B, V) + Send + Sync + 'static,
    {
        self.property(name, PropertyShape::Value(V::KIND), move |builder, bound| {
            match bound {
                Bound::Value(value) => {
                    setter(builder, expect_value::<V>(value)?);
                    Ok(())
                }
                other => Err(anyhow!("期望 {} 值，实际为 {:?}", V::KIND, other)),
            }
        })
    }

    /// 动态值属性
    pub fn dynamic<V, F>(self, name: impl Into<String>, setter: F) -> Self
    where
        V: FromValue,
        F: Fn(&mut B, Dynamic<V>) + Send + Sync + 'static,
    {
        self.property(name, PropertyShape::Dynamic(V::KIND), move |builder, bound| {
            match bound {
                Bound::Dynamic(dynamic) => {
                    setter(builder, dynamic.map(V::from_value));
                    Ok(())
                }
                other => Err(anyhow!("期望动态 {} 值，实际为 {:?}", V::KIND, other)),
            }
        })
    }

    /// 枚举属性，文本通过 `FromStr` 解析
    pub fn enumeration<E, F>(self, name: impl Into<String>, setter: F) -> Self
    where
        E: FromStr + Clone + Send + Sync + 'static,
        E::Err: fmt::Display,
        F: Fn(&mut B, E) + Send + Sync + 'static,
    {
        let shape = PropertyShape::Enum {
            type_name: std::any::type_name::<E>(),
            parse: Arc::new(|text: &str| {
                text.parse::<E>()
                    .map(|value| Instance::new(Arc::new(value)))
                    .map_err(|e| anyhow!("{}", e))
            }),
        };
        self.property(name, shape, move |builder, bound| {
            let value = match &bound {
                Bound::Instance(instance) => instance.downcast::<E>(),
                _ => None,
            };
            match value {
                Some(value) => {
                    setter(builder, (*value).clone());
                    Ok(())
                }
                None => Err(anyhow!(
                    "期望 {}，实际为 {:?}",
                    std::any::type_name::<E>(),
                    bound
                )),
            }
        })
    }

    /// 类表引用属性
    pub fn class<F>(self, name: impl Into<String>, setter: F) -> Self
    where
        F: Fn(&mut B, ClassRef) + Send + Sync + 'static,
    {
        self.property(name, PropertyShape::Class, move |builder, bound| match bound {
            Bound::Class(class) => {
                setter(builder, class);
                Ok(())
            }
            other => Err(anyhow!("期望类引用，实际为 {:?}", other)),
        })
    }

    /// 外部实例引用属性，由绑定链解析
    pub fn reference<U, F>(self, name: impl Into<String>, setter: F) -> Self
    where
        U: ?Sized + Send + Sync + 'static,
        F: Fn(&mut B, Arc<U>) + Send + Sync + 'static,
    {
        self.property(
            name,
            PropertyShape::Reference(TypeKey::of::<U>()),
            move |builder, bound| {
                let value = match &bound {
                    Bound::Instance(instance) => instance.downcast::<U>(),
                    _ => None,
                };
                match value {
                    Some(value) => {
                        setter(builder, value);
                        Ok(())
                    }
                    None => Err(anyhow!(
                        "期望 {} 实例，实际为 {:?}",
                        std::any::type_name::<U>(),
                        bound
                    )),
                }
            },
        )
    }

    /// 构建器类型名
    pub fn raw_type(&self) -> &'static str {
        self.raw_type
    }

    /// 全部属性声明
    pub fn declarations(&self) -> &[PropertyDeclaration<B>] {
        &self.declarations
    }

    /// 用绑定器工厂编译配方，同名声明合并为一个属性
    pub(crate) fn compile(self, binders: &BinderFactoryResolver) -> CompiledRecipe<B, T> {
        let mut properties: Vec<PropertyInfo<B>> = Vec::new();
        for declaration in self.declarations {
            let Some(binder) = binders.resolve(&declaration.shape) else {
                warn!(
                    "{} 的属性 '{}' 没有可用的绑定器 ({})",
                    self.raw_type,
                    declaration.name,
                    declaration.shape.describe()
                );
                continue;
            };
            let index = match properties.iter().position(|p| p.name == declaration.name) {
                Some(index) => index,
                None => {
                    properties.push(PropertyInfo::new(declaration.name.clone()));
                    properties.len() - 1
                }
            };
            properties[index].add_candidate(declaration.shape, binder, declaration.setter);
        }

        CompiledRecipe {
            raw_type: self.raw_type,
            instantiator: self.instantiator,
            id_setter: self.id_setter,
            properties,
            finisher: self.finisher,
        }
    }
}

fn expect_value<V: FromValue>(value: Value) -> anyhow::Result<V> {
    let kind = value.kind();
    V::from_value(value).ok_or_else(|| anyhow!("期望 {} 值，实际为 {}", V::KIND, kind))
}

/// 编译后的配方
pub(crate) struct CompiledRecipe<B, T: ?Sized> {
    pub(crate) raw_type: &'static str,
    pub(crate) instantiator: Instantiator<B>,
    pub(crate) id_setter: Option<IdSetter<B>>,
    pub(crate) properties: Vec<PropertyInfo<B>>,
    pub(crate) finisher: Finisher<B, T>,
}

struct Candidate<B> {
    binder: Arc<dyn PropertyBinder>,
    setter: Setter<B>,
}

/// 一个可设置的属性及其候选绑定器
///
/// 候选按 外部实例 → 动态值 → 字面量 的顺序尝试，第一个成功的生效；
/// 全部不适用时属性保持构建器默认值。
pub struct PropertyInfo<B> {
    name: String,
    shapes: Vec<PropertyShape>,
    binding: Option<Candidate<B>>,
    dynamic: Option<Candidate<B>>,
    simple: Option<Candidate<B>>,
}

impl<B> PropertyInfo<B> {
    fn new(name: String) -> Self {
        Self {
            name,
            shapes: Vec::new(),
            binding: None,
            dynamic: None,
            simple: None,
        }
    }

    fn add_candidate(&mut self, shape: PropertyShape, binder: Arc<dyn PropertyBinder>, setter: Setter<B>) {
        let slot = match shape.slot() {
            BinderSlot::Binding => &mut self.binding,
            BinderSlot::Dynamic => &mut self.dynamic,
            BinderSlot::Simple => &mut self.simple,
        };
        if slot.is_some() {
            warn!("属性 '{}' 的 {:?} 候选被后声明的 {} 覆盖", self.name, shape.slot(), shape.describe());
        }
        *slot = Some(Candidate { binder, setter });
        self.shapes.push(shape);
    }

    /// 属性名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 声明过的形态
    pub fn shapes(&self) -> &[PropertyShape] {
        &self.shapes
    }

    /// 把配置子节点应用到构建器
    ///
    /// # 返回
    /// * `Ok(true)` - 某个候选成功绑定
    /// * `Ok(false)` - 没有候选适用
    pub fn apply(
        &self,
        lookup: &dyn InstanceLookup,
        builder: &mut B,
        node: &dyn ConfigurationNode,
    ) -> Result<bool> {
        let candidates = [&self.binding, &self.dynamic, &self.simple];
        for candidate in candidates.into_iter().flatten() {
            let bound = candidate
                .binder
                .bind(lookup, node)
                .map_err(|e| self.binding_error(e.into()))?;
            if let Some(bound) = bound {
                (candidate.setter)(builder, bound).map_err(|e| self.binding_error(e))?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn binding_error(&self, source: anyhow::Error) -> ForgeError {
        ForgeError::Binding {
            property: self.name.clone(),
            source,
        }
    }
}

/// 属性的文档描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// 属性名
    pub name: String,
    /// 接受的形态描述
    pub shapes: Vec<String>,
}

impl<B> From<&PropertyInfo<B>> for PropertyDescriptor {
    fn from(info: &PropertyInfo<B>) -> Self {
        Self {
            name: info.name.clone(),
            shapes: info.shapes.iter().map(PropertyShape::describe).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::json::JsonNode;
    use crate::lookup::EmptyLookup;
    use serde_json::json;

    #[derive(Default)]
    struct Builder {
        name: Option<String>,
        size: i32,
        label: Option<Dynamic<String>>,
    }

    fn recipe() -> Recipe<Builder, String> {
        Recipe::new(|b: Builder| Ok(Arc::new(b.name.unwrap_or_default())))
            .value("name", |b: &mut Builder, v: String| b.name = Some(v))
            .value("size", |b: &mut Builder, v: i32| b.size = v)
            .value("label", |b: &mut Builder, v: String| b.name = Some(v))
            .dynamic("label", |b: &mut Builder, v: Dynamic<String>| b.label = Some(v))
    }

    #[test]
    fn test_same_name_declarations_merge() {
        let compiled = recipe().compile(&BinderFactoryResolver::default());
        assert_eq!(compiled.properties.len(), 3);
        let label = compiled
            .properties
            .iter()
            .find(|p| p.name() == "label")
            .unwrap();
        assert_eq!(label.shapes().len(), 2);
    }

    #[test]
    fn test_dynamic_candidate_wins_over_simple() {
        let compiled = recipe().compile(&BinderFactoryResolver::default());
        let label = compiled
            .properties
            .iter()
            .find(|p| p.name() == "label")
            .unwrap();

        let mut builder = Builder::default();
        let node = JsonNode::new(None, None, "label", json!("hello"));
        assert!(label.apply(&EmptyLookup, &mut builder, &node).unwrap());
        assert!(builder.name.is_none());
        assert_eq!(builder.label.unwrap().value().as_deref(), Some("hello"));
    }

    #[test]
    fn test_apply_wraps_errors_with_property_name() {
        let compiled = recipe().compile(&BinderFactoryResolver::default());
        let size = compiled
            .properties
            .iter()
            .find(|p| p.name() == "size")
            .unwrap();

        let mut builder = Builder::default();
        let node = JsonNode::new(None, None, "size", json!("huge"));
        match size.apply(&EmptyLookup, &mut builder, &node) {
            Err(ForgeError::Binding { property, .. }) => assert_eq!(property, "size"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_descriptor() {
        let compiled = recipe().compile(&BinderFactoryResolver::default());
        let descriptors: Vec<PropertyDescriptor> =
            compiled.properties.iter().map(PropertyDescriptor::from).collect();
        assert_eq!(descriptors[0].name, "name");
        assert_eq!(descriptors[0].shapes, vec!["string".to_string()]);
        assert_eq!(
            descriptors[2].shapes,
            vec!["string".to_string(), "dynamic string".to_string()]
        );
    }
}
