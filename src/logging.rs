//! 日志系统模块
//!
//! 库内部只通过 `tracing` 宏记录日志。嵌入方可以用 [`LoggingSystem`]
//! 安装订阅者，日志设置本身也可以来自组件使用的同一个 [`PropertiesSource`]：
//!
//! ```text
//! logging.level=debug
//! logging.json=true
//! logging.file=/var/log/forge.log
//! logging.console=false
//! logging.modules.component_forge::binding=trace
//! ```

use crate::config::properties::PropertiesSource;
use crate::error::{ConfigError, Result as ForgeResult};
use log::LevelFilter;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter, Layer};

/// 日志设置在配置源中的前缀
pub const LOGGING_PREFIX: &str = "logging";

/// 已安装的日志配置，未安装时为 None
static INSTALLED: OnceLock<Mutex<Option<LogConfig>>> = OnceLock::new();

fn installed() -> &'static Mutex<Option<LogConfig>> {
    INSTALLED.get_or_init(|| Mutex::new(None))
}

/// 日志配置
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// 默认日志级别
    pub level: LevelFilter,
    /// 追加写入的日志文件
    pub file_path: Option<PathBuf>,
    /// 是否输出到标准输出
    pub console: bool,
    /// 是否使用JSON格式
    pub json_format: bool,
    /// 模块 → 级别，覆盖默认级别
    pub module_levels: BTreeMap<String, LevelFilter>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file_path: None,
            console: true,
            json_format: false,
            module_levels: BTreeMap::new(),
        }
    }
}

impl LogConfig {
    /// 从配置源读取 `logging.*`，缺失的项使用默认值
    ///
    /// # 返回
    /// * `Err(ConfigError::InvalidValue)` - 级别或布尔值无法解析
    pub fn from_source(source: &PropertiesSource) -> ForgeResult<Self> {
        let mut config = Self::default();
        let section = source.section(LOGGING_PREFIX);
        let prefix = format!("{}.", LOGGING_PREFIX);
        let module_prefix = format!("{}modules.", prefix);

        for (key, value) in &section {
            let value = value.trim();
            if let Some(module) = key.strip_prefix(&module_prefix) {
                config
                    .module_levels
                    .insert(module.to_string(), parse_level(key, value)?);
                continue;
            }
            match key.strip_prefix(&prefix) {
                Some("level") => config.level = parse_level(key, value)?,
                Some("json") => config.json_format = parse_flag(key, value)?,
                Some("console") => config.console = parse_flag(key, value)?,
                Some("file") if !value.is_empty() => config.file_path = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        Ok(config)
    }

    /// 构建过滤器：`RUST_LOG` 优先，其次默认级别和模块级别
    fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        let mut filter = EnvFilter::builder()
            .with_default_directive(directive(None, self.level)?)
            .from_env_lossy();
        for (module, level) in &self.module_levels {
            filter = filter.add_directive(directive(Some(module), *level)?);
        }
        Ok(filter)
    }
}

fn parse_level(key: &str, value: &str) -> Result<LevelFilter, ConfigError> {
    LevelFilter::from_str(value).map_err(|_| ConfigError::InvalidValue {
        path: key.to_string(),
        expected: "log level",
        value: value.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            path: key.to_string(),
            expected: "boolean",
            value: value.to_string(),
        }),
    }
}

fn directive(module: Option<&str>, level: LevelFilter) -> anyhow::Result<Directive> {
    let level = level.as_str().to_ascii_lowercase();
    let text = match module {
        Some(module) => format!("{}={}", module, level),
        None => level,
    };
    text.parse()
        .map_err(|e| anyhow::anyhow!("无效的日志指令 '{}': {}", text, e))
}

/// 日志系统
#[derive(Debug)]
pub struct LoggingSystem {
    config: LogConfig,
}

impl LoggingSystem {
    /// 安装全局订阅者
    ///
    /// 进程内只会安装一次；之后的调用直接返回，配置以第一次为准。
    /// 其他代码已经安装了订阅者时同样视为成功。
    ///
    /// # 参数
    /// * `config` - 日志配置
    ///
    /// # 返回
    /// * `Result<LoggingSystem>` - 生效的日志系统
    pub fn setup_logging(config: LogConfig) -> anyhow::Result<Self> {
        let mut installed = installed().lock();
        if let Some(current) = installed.as_ref() {
            return Ok(Self {
                config: current.clone(),
            });
        }

        bridge_log_crate();
        install_subscriber(&config)?;
        *installed = Some(config.clone());
        Ok(Self { config })
    }

    /// 从配置源读取 `logging.*` 后安装
    pub fn setup_from_source(source: &PropertiesSource) -> anyhow::Result<Self> {
        Self::setup_logging(LogConfig::from_source(source)?)
    }

    /// 生效的配置
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// 是否已安装
    pub fn is_initialized() -> bool {
        installed().lock().is_some()
    }

    /// 已安装的配置
    pub fn current_config() -> Option<LogConfig> {
        installed().lock().clone()
    }

    #[cfg(test)]
    fn reset_for_testing() {
        *installed().lock() = None;
    }
}

/// 把 `log` crate 的记录转发到 tracing，只执行一次
fn bridge_log_crate() {
    static BRIDGED: OnceLock<()> = OnceLock::new();
    BRIDGED.get_or_init(|| {
        // 已有 log 实现时保留它
        let _ = tracing_log::LogTracer::init();
    });
}

fn install_subscriber(config: &LogConfig) -> anyhow::Result<()> {
    let console = config.console.then(|| {
        let layer = fmt::layer()
            .with_timer(fmt::time::ChronoUtc::rfc_3339())
            .with_target(true)
            .with_thread_names(true);
        if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    });

    let file = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("打开日志文件 {} 失败: {}", path.display(), e))?;
            let layer = fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_timer(fmt::time::ChronoUtc::rfc_3339());
            Some(if config.json_format {
                layer.json().boxed()
            } else {
                layer.boxed()
            })
        }
        None => None,
    };

    let installed = registry()
        .with(config.env_filter()?)
        .with(console)
        .with(file)
        .try_init();
    match installed {
        Ok(()) => {
            tracing::info!("日志系统初始化完成");
            tracing::debug!("日志配置: {:?}", config);
        }
        Err(e) => tracing::debug!("沿用已安装的订阅者: {}", e),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_from_source() {
        let source = PropertiesSource::from_pairs([
            ("logging.level", "debug"),
            ("logging.json", "TRUE"),
            ("logging.console", "false"),
            ("logging.file", "/tmp/forge.log"),
            ("logging.modules.component_forge::binding", "trace"),
            ("id1.widget.type", "a"),
        ]);
        let config = LogConfig::from_source(&source).unwrap();
        assert_eq!(config.level, LevelFilter::Debug);
        assert!(config.json_format);
        assert!(!config.console);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/forge.log")));
        assert_eq!(
            config.module_levels.get("component_forge::binding"),
            Some(&LevelFilter::Trace)
        );

        let empty = LogConfig::from_source(&PropertiesSource::default()).unwrap();
        assert_eq!(empty, LogConfig::default());
    }

    #[test]
    fn test_invalid_level_rejected() {
        let source = PropertiesSource::from_pairs([("logging.level", "loud")]);
        assert!(LogConfig::from_source(&source).is_err());
    }

    #[test]
    fn test_directives() {
        assert!(directive(None, LevelFilter::Warn).is_ok());
        assert!(directive(Some("component_forge::binding"), LevelFilter::Off).is_ok());

        let config = LogConfig {
            module_levels: BTreeMap::from([("component_forge".to_string(), LevelFilter::Trace)]),
            ..LogConfig::default()
        };
        assert!(config.env_filter().is_ok());
    }

    #[test]
    #[serial]
    fn test_setup_is_idempotent() {
        LoggingSystem::reset_for_testing();

        let first = LoggingSystem::setup_logging(LogConfig::default()).unwrap();
        assert!(LoggingSystem::is_initialized());

        // 第二次调用沿用第一次的配置
        let second = LoggingSystem::setup_logging(LogConfig {
            json_format: true,
            ..LogConfig::default()
        })
        .unwrap();
        assert_eq!(second.config(), first.config());
        assert_eq!(LoggingSystem::current_config(), Some(LogConfig::default()));
    }

    #[test]
    #[serial]
    fn test_setup_with_file_output() {
        LoggingSystem::reset_for_testing();

        let temp_file = NamedTempFile::new().unwrap();
        let source = PropertiesSource::from_pairs([
            ("logging.console", "false"),
            ("logging.file", temp_file.path().to_str().unwrap()),
        ]);
        let system = LoggingSystem::setup_from_source(&source).unwrap();
        assert!(!system.config().console);
        assert!(system.config().file_path.is_some());
    }
}
