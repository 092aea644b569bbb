//! 周期刷新
//!
//! 定期读取某个组件类型的全部配置，与上一次快照按 id 比较，
//! 然后加载新增项、移除消失项、重建变化项。

use crate::component::manager::{Component, ComponentManager};
use crate::config::node::ConfigurationNode;
use crate::config::properties::PropertiesSource;
use crate::config::value::{Value, ValueKind};
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 配置快照：id → 配置节点
pub type Snapshot = HashMap<String, Arc<dyn ConfigurationNode>>;

/// 默认刷新间隔（秒）
fn default_refresh_rate() -> u64 {
    60
}

/// 刷新设置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefreshSettings {
    /// 是否启用周期刷新
    #[serde(default)]
    pub enabled: bool,
    /// 刷新间隔（秒）
    #[serde(
        default = "default_refresh_rate",
        rename = "refreshRateInSeconds",
        alias = "refresh_rate_seconds"
    )]
    pub refresh_rate_seconds: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh_rate_seconds: default_refresh_rate(),
        }
    }
}

impl RefreshSettings {
    /// 从配置源读取 `${type}.refresh.*`，缺失的项使用默认值
    pub fn from_source(source: &PropertiesSource, component_type: &str) -> Result<Self> {
        let mut settings = Self::default();
        let prefix = format!("{}.refresh", component_type);

        let enabled_key = format!("{}.enabled", prefix);
        if let Some(text) = source.get(&enabled_key) {
            if let Value::Boolean(enabled) = ValueKind::Boolean.parse(&enabled_key, &text)? {
                settings.enabled = enabled;
            }
        }

        let rate_key = format!("{}.refreshRateInSeconds", prefix);
        if let Some(text) = source.get(&rate_key) {
            if let Value::Long(rate) = ValueKind::Long.parse(&rate_key, &text)? {
                settings.refresh_rate_seconds = rate.max(1) as u64;
            }
        }
        Ok(settings)
    }

    /// 刷新间隔，至少一秒
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.refresh_rate_seconds.max(1))
    }
}

/// 两个快照之间的差异
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// 只在新快照中
    pub added: Vec<String>,
    /// 只在旧快照中
    pub removed: Vec<String>,
    /// 两边都有但配置不同
    pub changed: Vec<String>,
}

impl SnapshotDiff {
    /// 计算差异，各列表按 id 排序
    pub fn calculate(old: &Snapshot, new: &Snapshot) -> Self {
        let mut diff = Self::default();
        for (id, node) in new {
            match old.get(id) {
                None => diff.added.push(id.clone()),
                Some(previous) if previous.as_ref() != node.as_ref() => {
                    diff.changed.push(id.clone())
                }
                Some(_) => {}
            }
        }
        diff.removed = old
            .keys()
            .filter(|id| !new.contains_key(*id))
            .cloned()
            .collect();

        diff.added.sort();
        diff.removed.sort();
        diff.changed.sort();
        diff
    }

    /// 是否没有任何差异
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// 一次刷新的结果
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    /// 计算出的差异
    pub diff: SnapshotDiff,
    /// 成功加载的数量
    pub loaded: usize,
    /// 移除的数量
    pub removed: usize,
    /// 成功替换的数量
    pub replaced: usize,
    /// 失败的 id 及错误信息
    pub failures: Vec<(String, String)>,
    /// 完成时间
    pub refreshed_at: DateTime<Utc>,
}

impl RefreshReport {
    /// 是否有任何变更被应用
    pub fn has_changes(&self) -> bool {
        self.loaded + self.removed + self.replaced > 0
    }
}

/// 周期刷新服务
pub struct RefreshService<T: ?Sized> {
    /// 被刷新的管理器
    manager: Arc<ComponentManager<T>>,
    /// 刷新设置
    settings: RefreshSettings,
    /// 上一次的配置快照
    last_snapshot: Mutex<Snapshot>,
    /// 上一次刷新完成的时间
    last_refresh: Mutex<Option<DateTime<Utc>>>,
    /// 后台任务
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Component + ?Sized> RefreshService<T> {
    /// 创建刷新服务
    pub fn new(manager: Arc<ComponentManager<T>>, settings: RefreshSettings) -> Self {
        Self {
            manager,
            settings,
            last_snapshot: Mutex::new(HashMap::new()),
            last_refresh: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// 刷新设置
    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    /// 被刷新的管理器
    pub fn manager(&self) -> &Arc<ComponentManager<T>> {
        &self.manager
    }

    /// 上一次刷新完成的时间，从未刷新时为 None
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.lock()
    }

    /// 立即执行一次刷新
    ///
    /// 单个 id 的失败只记录日志；无论成功与否，新快照都作为下一次比较的基准。
    ///
    /// # 返回
    /// * `Err` - 只有读取全部配置失败时
    pub fn refresh_now(&self) -> Result<RefreshReport> {
        let manager = &self.manager;
        manager.apply(|| {
            let current = manager.resolver().all_configurations()?;
            let mut last = self.last_snapshot.lock();
            let diff = SnapshotDiff::calculate(&last, &current);

            let mut report = RefreshReport::default();
            if diff.is_empty() {
                debug!("{} 配置没有变化", manager.component_type());
            }

            for id in &diff.added {
                if manager.contains(id) {
                    debug!("组件 {} ({}) 已按需构建，跳过加载", manager.component_type(), id);
                    continue;
                }
                match manager.load(current[id].as_ref()) {
                    Ok(_) => report.loaded += 1,
                    Err(e) => {
                        warn!("加载组件 {} ({}) 失败: {}", manager.component_type(), id, e);
                        report.failures.push((id.clone(), e.to_string()));
                    }
                }
            }
            for id in &diff.removed {
                if manager.remove(id).is_some() {
                    report.removed += 1;
                }
            }
            for id in &diff.changed {
                match manager.replace_from(current[id].as_ref()) {
                    Ok(_) => report.replaced += 1,
                    Err(e) => {
                        warn!("替换组件 {} ({}) 失败: {}", manager.component_type(), id, e);
                        report.failures.push((id.clone(), e.to_string()));
                    }
                }
            }

            *last = current;
            report.diff = diff;
            report.refreshed_at = Utc::now();
            *self.last_refresh.lock() = Some(report.refreshed_at);
            if report.has_changes() {
                info!(
                    "{} 刷新完成: 新增 {}, 移除 {}, 替换 {}, 失败 {}",
                    manager.component_type(),
                    report.loaded,
                    report.removed,
                    report.replaced,
                    report.failures.len()
                );
            }
            Ok(report)
        })
    }

    /// 启动后台刷新任务，启动时立即执行一次
    ///
    /// # 返回
    /// * `bool` - 是否启动了任务（未启用或已在运行时为 false）
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.settings.enabled {
            debug!("{} 未启用周期刷新", self.manager.component_type());
            return false;
        }
        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.settings.interval();
        info!(
            "启动 {} 周期刷新，间隔 {:?}",
            self.manager.component_type(),
            period
        );
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(service) = weak.upgrade() else {
                    break;
                };
                match tokio::task::spawn_blocking(move || service.refresh_now()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("刷新配置失败: {}", e),
                    Err(e) => error!("刷新任务异常退出: {}", e),
                }
            }
        }));
        true
    }

    /// 停止后台刷新任务
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("{} 周期刷新已停止", self.manager.component_type());
        }
    }

    /// 后台任务是否在运行
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl<T: ?Sized> Drop for RefreshService<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
