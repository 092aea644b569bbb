//! 配置文件监控模块
//!
//! 监控配置文件变化，重新加载后整体替换 [`PropertiesSource`] 的内容。
//! 值发生变化的键会触发其动态值订阅者。

use crate::config::loader::{FileSourceLoader, SourceLoader};
use crate::config::properties::PropertiesSource;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

/// 配置源变更事件
#[derive(Debug, Clone)]
pub struct SourceChangeEvent {
    /// 配置文件路径
    pub path: PathBuf,
    /// 配置版本号
    pub version: u64,
    /// 新增、删除或值变化的键
    pub changed_keys: Vec<String>,
    /// 变更时间
    pub timestamp: Instant,
}

/// 配置文件监控器
pub struct SourceWatcher {
    /// 配置文件路径
    path: PathBuf,
    /// 被更新的配置源
    source: Arc<PropertiesSource>,
    /// 文件系统监控器
    watcher: Option<RecommendedWatcher>,
    /// 配置加载器
    loader: FileSourceLoader,
    /// 事件发送器
    event_sender: broadcast::Sender<SourceChangeEvent>,
    /// 防抖动延迟
    debounce_delay: Duration,
}

impl SourceWatcher {
    /// 创建新的配置监控器
    ///
    /// # 参数
    /// * `path` - 配置文件路径
    /// * `source` - 文件变化时被替换内容的配置源
    /// * `debounce_delay` - 防抖动延迟时间
    ///
    /// # 返回
    /// * `Result<(Self, broadcast::Receiver<SourceChangeEvent>)>` - 监控器和事件接收器
    pub fn new<P: AsRef<Path>>(
        path: P,
        source: Arc<PropertiesSource>,
        debounce_delay: Duration,
    ) -> Result<(Self, broadcast::Receiver<SourceChangeEvent>)> {
        let path = path.as_ref().to_path_buf();
        Self::validate_path(&path)?;

        let (event_sender, event_receiver) = broadcast::channel(32);
        let watcher = Self {
            path,
            source,
            watcher: None,
            loader: FileSourceLoader::default(),
            event_sender,
            debounce_delay,
        };
        Ok((watcher, event_receiver))
    }

    /// 使用指定加载器（例如关闭环境变量替换）
    pub fn with_loader(mut self, loader: FileSourceLoader) -> Self {
        self.loader = loader;
        self
    }

    /// 验证配置文件路径
    fn validate_path(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", path.display()));
        }
        if !path.is_file() {
            return Err(anyhow::anyhow!("路径不是文件: {}", path.display()));
        }
        std::fs::File::open(path)
            .map(|_| ())
            .with_context(|| format!("无法读取配置文件 {}", path.display()))
    }

    /// 立即加载一次文件内容到配置源
    ///
    /// # 返回
    /// * `Result<Vec<String>>` - 变化的键
    pub async fn load_now(&self) -> Result<Vec<String>> {
        Self::reload(&self.loader, &self.path, &self.source).await
    }

    /// 启动配置文件监控
    pub fn start(&mut self) -> Result<()> {
        info!("启动配置文件监控: {}", self.path.display());

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // 接收端关闭说明处理任务已结束
                let _ = tx.send(res);
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(1)),
        )
        .context("创建文件监控器失败")?;

        // 监控文件所在目录，编辑器常以替换文件的方式保存
        let watch_path = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("监控目录失败: {}", watch_path.display()))?;
        self.watcher = Some(watcher);

        let path = self.path.clone();
        let source = Arc::clone(&self.source);
        let event_sender = self.event_sender.clone();
        let loader = self.loader.clone();
        let debounce_delay = self.debounce_delay;

        tokio::spawn(async move {
            Self::handle_file_events(rx, path, source, event_sender, loader, debounce_delay).await;
        });

        info!("配置文件监控已启动");
        Ok(())
    }

    /// 处理文件系统事件
    async fn handle_file_events(
        mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
        path: PathBuf,
        source: Arc<PropertiesSource>,
        event_sender: broadcast::Sender<SourceChangeEvent>,
        loader: FileSourceLoader,
        debounce_delay: Duration,
    ) {
        let mut last_event_time: Option<Instant> = None;
        let mut version = 1u64;

        while let Some(res) = rx.recv().await {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("文件监控事件错误: {}", e);
                    continue;
                }
            };
            if !Self::is_target_file_event(&event, &path) {
                continue;
            }
            debug!("检测到配置文件变更事件: {:?}", event.kind);

            let now = Instant::now();
            if let Some(last_time) = last_event_time {
                if now.duration_since(last_time) < debounce_delay {
                    debug!("跳过重复事件（防抖动）");
                    continue;
                }
            }
            last_event_time = Some(now);

            // 等待文件写入完成
            tokio::time::sleep(debounce_delay).await;

            match Self::reload(&loader, &path, &source).await {
                Ok(changed_keys) => {
                    info!(
                        "配置重载成功，版本: {}，变更键: {}",
                        version,
                        changed_keys.len()
                    );
                    let event = SourceChangeEvent {
                        path: path.clone(),
                        version,
                        changed_keys,
                        timestamp: Instant::now(),
                    };
                    version += 1;
                    if event_sender.send(event).is_err() {
                        debug!("没有配置变更事件的订阅者");
                    }
                }
                Err(e) => error!("配置重载失败: {:#}", e),
            }
        }
    }

    /// 检查是否是目标文件的事件
    fn is_target_file_event(event: &Event, target_path: &Path) -> bool {
        match &event.kind {
            EventKind::Modify(_) | EventKind::Create(_) => event
                .paths
                .iter()
                .any(|path| path == target_path || path.file_name() == target_path.file_name()),
            _ => false,
        }
    }

    /// 重新加载配置并替换配置源内容
    async fn reload(
        loader: &FileSourceLoader,
        path: &Path,
        source: &PropertiesSource,
    ) -> Result<Vec<String>> {
        debug!("重新加载配置文件: {}", path.display());
        let properties = loader
            .load_from_file(path)
            .await
            .context("重新加载配置失败")?;
        Ok(source.replace_all(properties))
    }

    /// 订阅变更事件
    pub fn subscribe(&self) -> broadcast::Receiver<SourceChangeEvent> {
        self.event_sender.subscribe()
    }

    /// 停止监控
    pub fn stop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            drop(watcher);
            info!("配置文件监控已停止");
        }
    }
}

impl Drop for SourceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_watcher_creation() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[id1.widget]\ntype = \"a\"").unwrap();

        let source = Arc::new(PropertiesSource::default());
        let result = SourceWatcher::new(temp_file.path(), source, Duration::from_millis(100));
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_path_validation() {
        assert!(SourceWatcher::validate_path(Path::new("/nonexistent/forge.toml")).is_err());

        let temp_dir = tempfile::tempdir().unwrap();
        assert!(SourceWatcher::validate_path(temp_dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_load_now_replaces_source() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("forge.properties");
        fs::write(&path, "id1.widget.type=a\nid1.widget.name=str\n").unwrap();

        let source = Arc::new(PropertiesSource::from_pairs([("stale.widget.type", "x")]));
        let (watcher, _rx) =
            SourceWatcher::new(&path, Arc::clone(&source), Duration::from_millis(50)).unwrap();

        let mut changed = watcher.load_now().await.unwrap();
        changed.sort();
        assert_eq!(changed.len(), 3);
        assert_eq!(source.get("id1.widget.name").as_deref(), Some("str"));
        assert!(source.get("stale.widget.type").is_none());
    }
}
