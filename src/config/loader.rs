//! 配置源加载器
//!
//! 把 TOML 或 `.properties` 文件加载为扁平的点分键配置，
//! 支持环境变量替换

use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// TOML，表被展开为点分键
    Toml,
    /// `key=value` 形式的属性文件
    Properties,
}

impl SourceFormat {
    /// 根据文件扩展名判断格式，未知扩展名按 TOML 处理
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("properties") => SourceFormat::Properties,
            _ => SourceFormat::Toml,
        }
    }
}

/// 配置源加载器trait
#[async_trait]
pub trait SourceLoader: Send + Sync {
    /// 从文件加载配置
    ///
    /// # 参数
    /// * `path` - 配置文件路径
    ///
    /// # 返回
    /// * `Result<BTreeMap<String, String>>` - 扁平配置或错误
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<BTreeMap<String, String>>;

    /// 从字符串加载配置
    ///
    /// # 参数
    /// * `content` - 配置内容
    /// * `format` - 内容格式
    async fn load_from_string(
        &self,
        content: &str,
        format: SourceFormat,
    ) -> Result<BTreeMap<String, String>>;
}

/// 文件配置加载器
#[derive(Debug, Clone)]
pub struct FileSourceLoader {
    /// 是否启用环境变量替换
    enable_env_substitution: bool,
}

impl FileSourceLoader {
    /// 创建新的加载器
    ///
    /// # 参数
    /// * `enable_env_substitution` - 是否启用 `${VAR}` 环境变量替换
    pub fn new(enable_env_substitution: bool) -> Self {
        Self {
            enable_env_substitution,
        }
    }

    /// 替换字符串中的环境变量
    fn substitute_env_vars(&self, content: &str) -> Result<String> {
        if !self.enable_env_substitution {
            return Ok(content.to_string());
        }

        // 匹配 ${VAR_NAME} 格式的环境变量
        let env_var_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| ConfigError::ParseError(format!("正则表达式错误: {}", e)))?;

        let mut result = content.to_string();
        for captures in env_var_regex.captures_iter(content) {
            let full_match = &captures[0];
            let var_name = &captures[1];
            match std::env::var(var_name) {
                Ok(value) => result = result.replace(full_match, &value),
                Err(_) => {
                    return Err(ConfigError::EnvVarError {
                        var: var_name.to_string(),
                    }
                    .into())
                }
            }
        }
        Ok(result)
    }

    fn parse(&self, content: &str, format: SourceFormat) -> Result<BTreeMap<String, String>> {
        let processed = self.substitute_env_vars(content)?;
        match format {
            SourceFormat::Toml => parse_toml(&processed),
            SourceFormat::Properties => Ok(parse_properties(&processed)),
        }
    }
}

impl Default for FileSourceLoader {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl SourceLoader for FileSourceLoader {
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<BTreeMap<String, String>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            }
            .into());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let properties = self.parse(&content, SourceFormat::from_path(path))?;

        tracing::info!("成功加载配置文件: {} ({} 项)", path.display(), properties.len());
        Ok(properties)
    }

    async fn load_from_string(
        &self,
        content: &str,
        format: SourceFormat,
    ) -> Result<BTreeMap<String, String>> {
        let properties = self.parse(content, format)?;
        tracing::debug!("成功解析配置字符串 ({} 项)", properties.len());
        Ok(properties)
    }
}

/// 解析 TOML 并展开为点分键
fn parse_toml(content: &str) -> Result<BTreeMap<String, String>> {
    let table: toml::Table = toml::from_str(content)
        .map_err(|e| ConfigError::ParseError(format!("TOML解析失败: {}", e)))?;
    let mut properties = BTreeMap::new();
    flatten_table("", &table, &mut properties);
    Ok(properties)
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        flatten_value(&full, value, out);
    }
}

fn flatten_value(key: &str, value: &toml::Value, out: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => flatten_table(key, table, out),
        toml::Value::Array(items) if items.iter().any(|v| v.is_table()) => {
            for (index, item) in items.iter().enumerate() {
                flatten_value(&format!("{key}.{index}"), item, out);
            }
        }
        toml::Value::Array(items) => {
            let joined = items.iter().map(scalar_text).collect::<Vec<_>>().join(",");
            out.insert(key.to_string(), joined);
        }
        other => {
            out.insert(key.to_string(), scalar_text(other));
        }
    }
}

fn scalar_text(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 解析 `.properties` 文本
fn parse_properties(content: &str) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    let mut pending = String::new();

    for raw in content.lines() {
        let line = raw.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }
        // 行尾反斜杠表示续行
        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped);
            continue;
        }
        pending.push_str(line);
        let entry = std::mem::take(&mut pending);
        if let Some((key, value)) = split_entry(&entry) {
            properties.insert(key, value);
        }
    }
    if let Some((key, value)) = split_entry(&pending) {
        properties.insert(key, value);
    }
    properties
}

fn split_entry(entry: &str) -> Option<(String, String)> {
    if entry.is_empty() {
        return None;
    }
    let split_at = entry.find(|c| c == '=' || c == ':');
    let (key, value) = match split_at {
        Some(index) => (&entry[..index], &entry[index + 1..]),
        None => (entry, ""),
    };
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const TEST_TOML: &str = r#"
[id1.widget]
type = "a"
name = "str"
count = 3
tags = ["x", "y"]

[id1.widget.policy]
type = "pb"
arg1 = "xyz"

[widget.refresh]
enabled = true
refreshRateInSeconds = 5
"#;

    #[tokio::test]
    async fn test_toml_flattening() {
        let loader = FileSourceLoader::new(false);
        let props = loader
            .load_from_string(TEST_TOML, SourceFormat::Toml)
            .await
            .unwrap();

        assert_eq!(props.get("id1.widget.type").unwrap(), "a");
        assert_eq!(props.get("id1.widget.count").unwrap(), "3");
        assert_eq!(props.get("id1.widget.tags").unwrap(), "x,y");
        assert_eq!(props.get("id1.widget.policy.arg1").unwrap(), "xyz");
        assert_eq!(props.get("widget.refresh.enabled").unwrap(), "true");
    }

    #[tokio::test]
    async fn test_properties_format() {
        let content = "# comment\nid1.widget.type = a\n! other comment\nid1.widget.name: hello world\nid1.widget.long = one \\\n  two\n";
        let loader = FileSourceLoader::new(false);
        let props = loader
            .load_from_string(content, SourceFormat::Properties)
            .await
            .unwrap();

        assert_eq!(props.get("id1.widget.type").unwrap(), "a");
        assert_eq!(props.get("id1.widget.name").unwrap(), "hello world");
        assert_eq!(props.get("id1.widget.long").unwrap(), "one two");
        assert_eq!(props.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_toml() {
        let loader = FileSourceLoader::new(false);
        let result = loader.load_from_string("[broken", SourceFormat::Toml).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_env_var_substitution() {
        env::set_var("FORGE_TEST_POOL_SIZE", "16");
        let loader = FileSourceLoader::new(true);
        let props = loader
            .load_from_string("pool1.pool.size=${FORGE_TEST_POOL_SIZE}", SourceFormat::Properties)
            .await
            .unwrap();
        assert_eq!(props.get("pool1.pool.size").unwrap(), "16");
        env::remove_var("FORGE_TEST_POOL_SIZE");
    }

    #[tokio::test]
    #[serial]
    async fn test_env_var_substitution_missing_var() {
        let loader = FileSourceLoader::new(true);
        let result = loader
            .load_from_string("a.b.c=${FORGE_TEST_MISSING_VAR}", SourceFormat::Properties)
            .await;
        assert!(result.is_err());
        if let Err(e) = result {
            assert!(e.to_string().contains("FORGE_TEST_MISSING_VAR"));
        }
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let loader = FileSourceLoader::default();
        let result = loader.load_from_file("/nonexistent/forge.toml").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_properties_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("components.properties");
        std::fs::write(&path, "id1.widget.type=a\n").unwrap();

        let loader = FileSourceLoader::new(false);
        let props = loader.load_from_file(&path).await.unwrap();
        assert_eq!(props.get("id1.widget.type").unwrap(), "a");
    }
}
