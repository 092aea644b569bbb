//! 错误处理模块
//!
//! 定义组件构建引擎的统一错误类型

use thiserror::Error;

/// 组件构建引擎的主要错误类型
#[derive(Error, Debug)]
pub enum ForgeError {
    /// 指定 id 没有任何配置
    #[error("组件 '{component_type}' 缺少配置: id '{id}'")]
    ConfigurationMissing { component_type: String, id: String },

    /// 类型标识无法匹配任何工厂且没有默认工厂
    #[error(
        "无法创建组件 '{component_type}': 无效的实现类型 {requested:?}，可选类型: {known:?}"
    )]
    TypeResolution {
        component_type: String,
        requested: Option<String>,
        known: Vec<String>,
    },

    /// 构建过程中出现的任何错误（实例化、属性绑定、build）
    #[error("创建组件 '{component_type}' 失败 (id: {id:?}): {source}")]
    Construction {
        component_type: String,
        id: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    /// id 冲突
    #[error("组件 '{component_type}' 已存在: id '{id}'")]
    AlreadyExists { component_type: String, id: String },

    /// 配置节点缺少 id
    #[error("组件 '{component_type}' 的配置必须包含 id")]
    MissingId { component_type: String },

    /// 属性绑定失败
    #[error("属性 '{property}' 绑定失败: {source}")]
    Binding {
        property: String,
        #[source]
        source: anyhow::Error,
    },

    /// 配置源相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 配置源错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置内容解析错误
    #[error("配置解析失败: {0}")]
    ParseError(String),

    /// 配置值无法转换为目标类型
    #[error("配置值 '{path}' 无法转换为 {expected}: '{value}'")]
    InvalidValue {
        path: String,
        expected: &'static str,
        value: String,
    },

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },

    /// 解析器没有组件类型
    #[error("配置解析器必须指定组件类型")]
    MissingComponentType,
}

impl ForgeError {
    /// 用组件类型和 id 包装构建错误
    pub fn construction(
        component_type: impl Into<String>,
        id: Option<&str>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        ForgeError::Construction {
            component_type: component_type.into(),
            id: id.map(str::to_string),
            source: source.into(),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ForgeError>;
