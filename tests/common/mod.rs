//! 集成测试共用的组件定义
//!
//! `widget` 组件有两个实现（a、b），其 `policy` 属性引用 `dyn Policy`，
//! 由子类型工厂（pa、pb）或具名实例提供。

#![allow(dead_code)]

use component_forge::binder::BinderFactoryResolver;
use component_forge::component::{
    BindingComponentFactory, Component, ComponentModule, ComponentModuleBuilder, FactorySet,
    Recipe, RefreshSettings,
};
use component_forge::config::{
    Dynamic, DynamicWithDefault, PropertiesSource, PropertiesTypeConfigurationResolver,
};
use component_forge::lookup::{ClassRef, Registry};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub trait Policy: Send + Sync {
    fn describe(&self) -> String;
}

pub struct PolicyA {
    pub string: String,
}

impl Policy for PolicyA {
    fn describe(&self) -> String {
        format!("pa:{}", self.string)
    }
}

pub struct PolicyB {
    pub arg1: String,
}

impl Policy for PolicyB {
    fn describe(&self) -> String {
        format!("pb:{}", self.arg1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Lenient,
    Strict,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LENIENT" => Ok(Mode::Lenient),
            "STRICT" => Ok(Mode::Strict),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

pub trait Widget: Component {
    fn kind(&self) -> &'static str;
    fn id(&self) -> Option<&str>;
    fn name(&self) -> &str;
    fn as_a(&self) -> Option<&WidgetA> {
        None
    }
}

/// 实现 a，覆盖所有属性形态
pub struct WidgetA {
    pub id: Option<String>,
    pub name: String,
    pub count: i32,
    pub total: i64,
    pub ratio: f64,
    pub enabled: bool,
    pub mode: Mode,
    pub codec: Option<ClassRef>,
    pub extra: BTreeMap<String, String>,
    pub label: DynamicWithDefault<String>,
    pub policy: Option<Arc<dyn Policy>>,
    pub parent: Option<Arc<dyn Widget>>,
    pub started: AtomicUsize,
    pub destroyed: AtomicUsize,
}

impl WidgetA {
    pub fn named(name: &str) -> Self {
        WidgetBuilder {
            name: name.to_string(),
            ..WidgetBuilder::default()
        }
        .into()
    }
}

impl fmt::Debug for WidgetA {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetA")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl Component for WidgetA {
    fn post_construct(&self) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pre_destroy(&self) -> anyhow::Result<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        if self.name == "explode-on-destroy" {
            anyhow::bail!("teardown failure");
        }
        Ok(())
    }
}

impl Widget for WidgetA {
    fn kind(&self) -> &'static str {
        "a"
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_a(&self) -> Option<&WidgetA> {
        Some(self)
    }
}

/// 实现 b，只有名称
pub struct WidgetB {
    pub name: String,
}

impl Component for WidgetB {}

impl Widget for WidgetB {
    fn kind(&self) -> &'static str {
        "b"
    }

    fn id(&self) -> Option<&str> {
        None
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct WidgetBuilder {
    pub id: Option<String>,
    pub name: String,
    pub count: i32,
    pub total: i64,
    pub ratio: f64,
    pub enabled: bool,
    pub mode: Mode,
    pub codec: Option<ClassRef>,
    pub extra: BTreeMap<String, String>,
    pub label: DynamicWithDefault<String>,
    pub policy: Option<Arc<dyn Policy>>,
    pub parent: Option<Arc<dyn Widget>>,
}

impl Default for WidgetBuilder {
    fn default() -> Self {
        Self {
            id: None,
            name: "default".to_string(),
            count: 1,
            total: 0,
            ratio: 0.0,
            enabled: false,
            mode: Mode::default(),
            codec: None,
            extra: BTreeMap::new(),
            label: DynamicWithDefault::new("none".to_string()),
            policy: None,
            parent: None,
        }
    }
}

impl From<WidgetBuilder> for WidgetA {
    fn from(b: WidgetBuilder) -> Self {
        WidgetA {
            id: b.id,
            name: b.name,
            count: b.count,
            total: b.total,
            ratio: b.ratio,
            enabled: b.enabled,
            mode: b.mode,
            codec: b.codec,
            extra: b.extra,
            label: b.label,
            policy: b.policy,
            parent: b.parent,
            started: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        }
    }
}

pub fn widget_a_recipe() -> Recipe<WidgetBuilder, dyn Widget> {
    widget_a_recipe_with(|| {})
}

/// 每次实例化构建器时调用 `on_instantiate`
pub fn widget_a_recipe_with<F>(on_instantiate: F) -> Recipe<WidgetBuilder, dyn Widget>
where
    F: Fn() + Send + Sync + 'static,
{
    Recipe::with_instantiator(
        move |_, _| {
            on_instantiate();
            Ok(WidgetBuilder::default())
        },
        |b: WidgetBuilder| Ok(Arc::new(WidgetA::from(b)) as Arc<dyn Widget>),
    )
    .id(|b: &mut WidgetBuilder, id: &str| b.id = Some(id.to_string()))
    .value("name", |b: &mut WidgetBuilder, v: String| b.name = v)
    .value("count", |b: &mut WidgetBuilder, v: i32| b.count = v)
    .value("total", |b: &mut WidgetBuilder, v: i64| b.total = v)
    .value("ratio", |b: &mut WidgetBuilder, v: f64| b.ratio = v)
    .value("enabled", |b: &mut WidgetBuilder, v: bool| b.enabled = v)
    .value("extra", |b: &mut WidgetBuilder, v: BTreeMap<String, String>| {
        b.extra = v
    })
    .enumeration("mode", |b: &mut WidgetBuilder, v: Mode| b.mode = v)
    .class("codec", |b: &mut WidgetBuilder, v: ClassRef| b.codec = Some(v))
    .dynamic("label", |b: &mut WidgetBuilder, v: Dynamic<String>| {
        b.label.set_source(v)
    })
    .reference("policy", |b: &mut WidgetBuilder, v: Arc<dyn Policy>| {
        b.policy = Some(v)
    })
    .reference("parent", |b: &mut WidgetBuilder, v: Arc<dyn Widget>| {
        b.parent = Some(v)
    })
}

#[derive(Default)]
pub struct WidgetBBuilder {
    name: String,
}

pub fn widget_b_recipe() -> Recipe<WidgetBBuilder, dyn Widget> {
    Recipe::new(|b: WidgetBBuilder| Ok(Arc::new(WidgetB { name: b.name }) as Arc<dyn Widget>))
        .value("name", |b: &mut WidgetBBuilder, v: String| b.name = v)
}

#[derive(Default)]
struct PolicyABuilder {
    string: String,
}

#[derive(Default)]
struct PolicyBBuilder {
    arg1: String,
}

/// 注册 `dyn Policy` 的子类型工厂
pub fn register_policies(registry: &Registry) {
    let binders = BinderFactoryResolver::default();
    let policies = FactorySet::<dyn Policy>::new()
        .with(
            "pa",
            Arc::new(BindingComponentFactory::new(
                Recipe::new(|b: PolicyABuilder| {
                    Ok(Arc::new(PolicyA { string: b.string }) as Arc<dyn Policy>)
                })
                .value("string", |b: &mut PolicyABuilder, v: String| b.string = v),
                &binders,
            )),
        )
        .with(
            "pb",
            Arc::new(BindingComponentFactory::new(
                Recipe::new(|b: PolicyBBuilder| {
                    Ok(Arc::new(PolicyB { arg1: b.arg1 }) as Arc<dyn Policy>)
                })
                .value("arg1", |b: &mut PolicyBBuilder, v: String| b.arg1 = v),
                &binders,
            )),
        );
    registry.register_factories::<dyn Policy>(Arc::new(policies));
}

pub struct Fixture {
    pub source: Arc<PropertiesSource>,
    pub registry: Arc<Registry>,
    pub module: ComponentModule<dyn Widget>,
}

/// 带 a、b 两个实现的 widget 模块
pub fn fixture(pairs: &[(&str, &str)]) -> Fixture {
    fixture_with(pairs, |builder| builder)
}

pub fn fixture_with<F>(pairs: &[(&str, &str)], customize: F) -> Fixture
where
    F: FnOnce(ComponentModuleBuilder<dyn Widget>) -> ComponentModuleBuilder<dyn Widget>,
{
    let source = Arc::new(PropertiesSource::from_pairs(pairs.iter().copied()));
    fixture_from_source(source, customize)
}

/// 使用已有配置源（例如由文件监控器维护）的 widget 模块
pub fn fixture_from_source<F>(source: Arc<PropertiesSource>, customize: F) -> Fixture
where
    F: FnOnce(ComponentModuleBuilder<dyn Widget>) -> ComponentModuleBuilder<dyn Widget>,
{
    let registry = Arc::new(Registry::new());
    register_policies(&registry);

    let settings = RefreshSettings::from_source(&source, "widget").unwrap();
    let builder = ComponentModuleBuilder::<dyn Widget>::new(
        "widget",
        Arc::new(PropertiesTypeConfigurationResolver::new(Arc::clone(&source))),
    )
    .registry(Arc::clone(&registry))
    .refresh(settings);
    let module = customize(builder).build().unwrap();

    Fixture {
        source,
        registry,
        module,
    }
}

/// 注册 a、b 两个配方
pub fn with_both(builder: ComponentModuleBuilder<dyn Widget>) -> ComponentModuleBuilder<dyn Widget> {
    builder
        .recipe("a", widget_a_recipe())
        .recipe("b", widget_b_recipe())
}
