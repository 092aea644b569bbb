//! 属性绑定器
//!
//! 每个可设置属性都声明一个形态（[`PropertyShape`]）。绑定器工厂根据形态决定
//! 是否适用，适用时返回一个 [`PropertyBinder`]，它读取一个配置子节点并产出
//! 要交给构建器的值（[`Bound`]）。

pub mod factories;

use crate::binding::BindingChain;
use crate::config::dynamic::Dynamic;
use crate::config::node::ConfigurationNode;
use crate::config::value::{Value, ValueKind};
use crate::error::Result;
use crate::lookup::{ClassRef, Instance, InstanceLookup, TypeKey};
use std::fmt;
use std::sync::Arc;

pub use factories::{
    ClassBinderFactory, DynamicBinderFactory, EnumBinderFactory, PropertiesBinderFactory,
    ValueBinderFactory,
};

/// 枚举文本解析函数
pub type EnumParser = Arc<dyn Fn(&str) -> anyhow::Result<Instance> + Send + Sync>;

/// 属性接受的值形态
#[derive(Clone)]
pub enum PropertyShape {
    /// 字面量值（字符串、数字、布尔、属性映射）
    Value(ValueKind),
    /// 通过 `FromStr` 解析的枚举
    Enum {
        /// 枚举类型名
        type_name: &'static str,
        /// 解析函数
        parse: EnumParser,
    },
    /// 类表引用
    Class,
    /// 可观察的动态值
    Dynamic(ValueKind),
    /// 由绑定链解析的外部实例
    Reference(TypeKey),
}

impl PropertyShape {
    /// 该形态的候选槽位
    pub fn slot(&self) -> BinderSlot {
        match self {
            PropertyShape::Reference(_) => BinderSlot::Binding,
            PropertyShape::Dynamic(_) => BinderSlot::Dynamic,
            _ => BinderSlot::Simple,
        }
    }

    /// 用于文档和日志的描述
    pub fn describe(&self) -> String {
        match self {
            PropertyShape::Value(kind) => kind.name().to_string(),
            PropertyShape::Enum { type_name, .. } => format!("enum {}", type_name),
            PropertyShape::Class => "class".to_string(),
            PropertyShape::Dynamic(kind) => format!("dynamic {}", kind.name()),
            PropertyShape::Reference(key) => format!("ref {}", key.name()),
        }
    }
}

impl fmt::Debug for PropertyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// 同一属性的候选绑定器槽位，按尝试顺序排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BinderSlot {
    /// 外部实例绑定（具名、管理器、按键、子类型）
    Binding,
    /// 动态值绑定
    Dynamic,
    /// 字面量绑定
    Simple,
}

/// 绑定结果
#[derive(Clone)]
pub enum Bound {
    /// 字面量
    Value(Value),
    /// 动态值
    Dynamic(Dynamic<Value>),
    /// 外部实例或解析后的枚举
    Instance(Instance),
    /// 类表条目
    Class(ClassRef),
}

impl fmt::Debug for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Value(value) => write!(f, "Value({:?})", value),
            Bound::Dynamic(_) => f.write_str("Dynamic"),
            Bound::Instance(instance) => write!(f, "{:?}", instance),
            Bound::Class(class) => write!(f, "Class({})", class.name),
        }
    }
}

/// 属性绑定器
///
/// 返回 `Ok(None)` 表示不适用，由下一个候选继续尝试。
pub trait PropertyBinder: Send + Sync {
    /// 读取配置子节点
    fn bind(&self, lookup: &dyn InstanceLookup, node: &dyn ConfigurationNode)
        -> Result<Option<Bound>>;
}

impl<F> PropertyBinder for F
where
    F: Fn(&dyn InstanceLookup, &dyn ConfigurationNode) -> Result<Option<Bound>> + Send + Sync,
{
    fn bind(
        &self,
        lookup: &dyn InstanceLookup,
        node: &dyn ConfigurationNode,
    ) -> Result<Option<Bound>> {
        self(lookup, node)
    }
}

/// 由闭包创建绑定器
pub fn binder_fn<F>(f: F) -> Arc<dyn PropertyBinder>
where
    F: Fn(&dyn InstanceLookup, &dyn ConfigurationNode) -> Result<Option<Bound>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// 属性绑定器工厂
pub trait PropertyBinderFactory: Send + Sync {
    /// 工厂名称，用于日志
    fn name(&self) -> &'static str;

    /// 根据形态创建绑定器，不适用时返回 None
    fn create(&self, shape: &PropertyShape) -> Option<Arc<dyn PropertyBinder>>;
}

/// 按顺序尝试的绑定器工厂集合
#[derive(Clone)]
pub struct BinderFactoryResolver {
    factories: Vec<Arc<dyn PropertyBinderFactory>>,
}

impl BinderFactoryResolver {
    /// 使用指定工厂列表
    pub fn new(factories: Vec<Arc<dyn PropertyBinderFactory>>) -> Self {
        Self { factories }
    }

    /// 在最前面追加工厂，使其优先于已有工厂
    pub fn with_factory(mut self, factory: Arc<dyn PropertyBinderFactory>) -> Self {
        self.factories.insert(0, factory);
        self
    }

    /// 为形态选择第一个适用的绑定器
    pub fn resolve(&self, shape: &PropertyShape) -> Option<Arc<dyn PropertyBinder>> {
        self.factories.iter().find_map(|factory| {
            let binder = factory.create(shape)?;
            tracing::trace!("形态 {} 使用绑定器 {}", shape.describe(), factory.name());
            Some(binder)
        })
    }
}

impl Default for BinderFactoryResolver {
    fn default() -> Self {
        let mut factories: Vec<Arc<dyn PropertyBinderFactory>> = vec![
            Arc::new(BindingChain::default()),
            Arc::new(DynamicBinderFactory),
        ];
        for kind in [
            ValueKind::String,
            ValueKind::Integer,
            ValueKind::Long,
            ValueKind::Double,
            ValueKind::Boolean,
        ] {
            factories.push(Arc::new(ValueBinderFactory::new(kind)));
        }
        factories.push(Arc::new(PropertiesBinderFactory));
        factories.push(Arc::new(EnumBinderFactory));
        factories.push(Arc::new(ClassBinderFactory));
        Self { factories }
    }
}

impl fmt::Debug for BinderFactoryResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.factories.iter().map(|factory| factory.name()))
            .finish()
    }
}
