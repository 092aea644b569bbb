//! 动态配置值
//!
//! 提供可订阅变更通知的配置值。回调在触发变更的线程上同步执行，
//! 调用方不应假设回调与通知线程隔离。

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// 变更回调，参数为变更后的值（键被删除时为 None）
pub type ChangeCallback<T> = Arc<dyn Fn(Option<T>) + Send + Sync>;

type Reader<T> = Arc<dyn Fn() -> Option<T> + Send + Sync>;
type Watcher<T> = Arc<dyn Fn(ChangeCallback<T>) -> Subscription + Send + Sync>;

/// 订阅句柄，drop 时取消订阅
#[must_use = "订阅句柄被丢弃时会立即取消订阅"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// 创建带取消动作的订阅
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// 不会收到任何通知的空订阅
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    /// 显式取消订阅
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// 可观察的动态配置值
pub struct Dynamic<T> {
    read: Reader<T>,
    watch: Watcher<T>,
}

impl<T> Clone for Dynamic<T> {
    fn clone(&self) -> Self {
        Self {
            read: Arc::clone(&self.read),
            watch: Arc::clone(&self.watch),
        }
    }
}

impl<T> fmt::Debug for Dynamic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dynamic")
    }
}

impl<T: Send + Sync + 'static> Dynamic<T> {
    /// 由读取函数和订阅函数创建动态值
    pub fn new<R, W>(read: R, watch: W) -> Self
    where
        R: Fn() -> Option<T> + Send + Sync + 'static,
        W: Fn(ChangeCallback<T>) -> Subscription + Send + Sync + 'static,
    {
        Self {
            read: Arc::new(read),
            watch: Arc::new(watch),
        }
    }

    /// 固定值，永远不会触发变更通知
    pub fn fixed(value: Option<T>) -> Self
    where
        T: Clone,
    {
        Self::new(move || value.clone(), |_| Subscription::detached())
    }

    /// 读取当前值
    pub fn value(&self) -> Option<T> {
        (self.read)()
    }

    /// 订阅变更，返回的句柄被 drop 后不再回调
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<T>) + Send + Sync + 'static,
    {
        (self.watch)(Arc::new(callback))
    }

    /// 转换值类型，转换失败的值视为缺失
    pub fn map<U, F>(&self, f: F) -> Dynamic<U>
    where
        U: Send + Sync + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let read = Arc::clone(&self.read);
        let watch = Arc::clone(&self.watch);
        let read_map = Arc::clone(&f);
        Dynamic::new(
            move || read().and_then(|v| read_map(v)),
            move |callback: ChangeCallback<U>| {
                let f = Arc::clone(&f);
                watch(Arc::new(move |value: Option<T>| {
                    callback(value.and_then(|v| f(v)))
                }))
            },
        )
    }
}

enum Source<T> {
    Default,
    Dynamic(Dynamic<T>),
    Fixed(T),
}

/// 带编译期默认值的动态值
///
/// 供构建器持有：配置中有值时使用配置值，否则回退到默认值。
pub struct DynamicWithDefault<T> {
    default: T,
    source: RwLock<Source<T>>,
}

impl<T: Clone + Send + Sync + 'static> DynamicWithDefault<T> {
    /// 以默认值创建
    pub fn new(default: T) -> Self {
        Self {
            default,
            source: RwLock::new(Source::Default),
        }
    }

    /// 当前值
    pub fn get(&self) -> T {
        match &*self.source.read() {
            Source::Default => self.default.clone(),
            Source::Dynamic(dynamic) => dynamic.value().unwrap_or_else(|| self.default.clone()),
            Source::Fixed(value) => value.clone(),
        }
    }

    /// 设置动态来源
    pub fn set_source(&self, source: Dynamic<T>) {
        *self.source.write() = Source::Dynamic(source);
    }

    /// 设置固定值
    pub fn set_value(&self, value: T) {
        *self.source.write() = Source::Fixed(value);
    }

    /// 订阅来源变更；来源不是动态值时返回空订阅。
    /// 之后再替换来源不会迁移已有订阅。
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        match &*self.source.read() {
            Source::Dynamic(dynamic) => {
                let default = self.default.clone();
                dynamic.subscribe(move |value| callback(value.unwrap_or_else(|| default.clone())))
            }
            _ => Subscription::detached(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for DynamicWithDefault<T> {
    fn clone(&self) -> Self {
        let source = match &*self.source.read() {
            Source::Default => Source::Default,
            Source::Dynamic(dynamic) => Source::Dynamic(dynamic.clone()),
            Source::Fixed(value) => Source::Fixed(value.clone()),
        };
        Self {
            default: self.default.clone(),
            source: RwLock::new(source),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for DynamicWithDefault<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicWithDefault")
            .field("default", &self.default)
            .finish()
    }
}
