//! 扁平键值配置源
//!
//! 以 `${id}.${type}.${property}` 形式的点分键保存配置，
//! 支持运行时修改并向动态值订阅者发送变更通知。

use crate::config::dynamic::{ChangeCallback, Dynamic, Subscription};
use crate::config::node::{ConfigurationNode, Fingerprint};
use crate::config::value::{Value, ValueKind};
use crate::error::ConfigError;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// 类型标识字段名
pub const TYPE_FIELD: &str = "type";

/// 拼接点分键，前缀为空时直接返回名称
pub fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// 键是否位于 `path` 本身或其下
pub(crate) fn is_at_or_under(key: &str, path: &str) -> bool {
    key == path
        || (key.len() > path.len() && key.starts_with(path) && key.as_bytes()[path.len()] == b'.')
}

#[derive(Default)]
struct ListenerTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<String, Vec<(u64, ChangeCallback<String>)>>>,
}

impl ListenerTable {
    fn remove(&self, key: &str, id: u64) {
        let mut entries = self.entries.lock();
        if let Some(list) = entries.get_mut(key) {
            list.retain(|(listener_id, _)| *listener_id != id);
            if list.is_empty() {
                entries.remove(key);
            }
        }
    }

    fn callbacks(&self, key: &str) -> Vec<ChangeCallback<String>> {
        self.entries
            .lock()
            .get(key)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }
}

/// 可变的扁平键值配置源
pub struct PropertiesSource {
    /// 全部配置项
    properties: RwLock<BTreeMap<String, String>>,
    /// 按键注册的变更订阅者
    listeners: Arc<ListenerTable>,
}

impl PropertiesSource {
    /// 从已有映射创建配置源
    pub fn new(properties: BTreeMap<String, String>) -> Self {
        Self {
            properties: RwLock::new(properties),
            listeners: Arc::new(ListenerTable::default()),
        }
    }

    /// 从键值对创建配置源
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// 读取单个配置项
    pub fn get(&self, key: &str) -> Option<String> {
        self.properties.read().get(key).cloned()
    }

    /// 是否包含配置项
    pub fn contains_key(&self, key: &str) -> bool {
        self.properties.read().contains_key(key)
    }

    /// 全部键
    pub fn keys(&self) -> Vec<String> {
        self.properties.read().keys().cloned().collect()
    }

    /// 配置项数量
    pub fn len(&self) -> usize {
        self.properties.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.properties.read().is_empty()
    }

    /// 全部配置的快照
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.properties.read().clone()
    }

    /// `path` 本身及其下所有配置项的快照
    pub fn section(&self, path: &str) -> BTreeMap<String, String> {
        self.properties
            .read()
            .range(path.to_string()..)
            .take_while(|(key, _)| key.starts_with(path))
            .filter(|(key, _)| is_at_or_under(key, path))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// 设置配置项，值变化时通知订阅者
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let previous = self.properties.write().insert(key.clone(), value.clone());
        if previous.as_deref() != Some(value.as_str()) {
            self.notify(&key, Some(value));
        }
    }

    /// 删除配置项
    pub fn remove(&self, key: &str) -> Option<String> {
        let previous = self.properties.write().remove(key);
        if previous.is_some() {
            self.notify(key, None);
        }
        previous
    }

    /// 整体替换配置内容
    ///
    /// # 返回
    /// * `Vec<String>` - 新增、删除或值变化的键
    pub fn replace_all(&self, properties: BTreeMap<String, String>) -> Vec<String> {
        let changed: Vec<(String, Option<String>)> = {
            let mut current = self.properties.write();
            let mut changed = Vec::new();
            for (key, value) in &properties {
                if current.get(key) != Some(value) {
                    changed.push((key.clone(), Some(value.clone())));
                }
            }
            for key in current.keys() {
                if !properties.contains_key(key) {
                    changed.push((key.clone(), None));
                }
            }
            *current = properties;
            changed
        };

        debug!("配置源内容已替换，变更键数量: {}", changed.len());
        for (key, value) in &changed {
            self.notify(key, value.clone());
        }
        changed.into_iter().map(|(key, _)| key).collect()
    }

    /// 订阅单个键的变更
    pub fn watch(&self, key: &str, callback: ChangeCallback<String>) -> Subscription {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .entries
            .lock()
            .entry(key.to_string())
            .or_default()
            .push((id, callback));

        let table: Weak<ListenerTable> = Arc::downgrade(&self.listeners);
        let key = key.to_string();
        Subscription::new(move || {
            if let Some(table) = table.upgrade() {
                table.remove(&key, id);
            }
        })
    }

    // 在释放配置锁之后调用，回调可以重新进入配置源
    fn notify(&self, key: &str, value: Option<String>) {
        for callback in self.listeners.callbacks(key) {
            callback(value.clone());
        }
    }
}

impl Default for PropertiesSource {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

impl fmt::Debug for PropertiesSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertiesSource")
            .field("len", &self.len())
            .finish()
    }
}

/// 基于 [`PropertiesSource`] 的配置节点
///
/// 静态值读取节点创建时的快照，动态值读取实时配置。
#[derive(Debug, Clone)]
pub struct PropertiesNode {
    id: Option<String>,
    declared_type: Option<String>,
    full_name: String,
    section: Arc<BTreeMap<String, String>>,
    source: Arc<PropertiesSource>,
}

impl PropertiesNode {
    /// 创建以 `full_name` 为根的节点
    pub fn new(
        source: Arc<PropertiesSource>,
        id: Option<String>,
        declared_type: Option<String>,
        full_name: impl Into<String>,
    ) -> Self {
        let full_name = full_name.into();
        let section = Arc::new(source.section(&full_name));
        Self {
            id,
            declared_type,
            full_name,
            section,
            source,
        }
    }

    /// 节点范围内是否有任何配置
    pub fn is_empty(&self) -> bool {
        self.section.is_empty()
    }

    fn properties_value(&self) -> Result<Option<Value>, ConfigError> {
        if let Some(value) = self.section.get(&self.full_name) {
            return Err(ConfigError::InvalidValue {
                path: self.full_name.clone(),
                expected: ValueKind::Properties.name(),
                value: value.clone(),
            });
        }
        let prefix = format!("{}.", self.full_name);
        let map: BTreeMap<String, String> = self
            .section
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v.clone())))
            .collect();
        Ok(Some(Value::Properties(map)))
    }
}

impl ConfigurationNode for PropertiesNode {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn declared_type(&self) -> Option<&str> {
        self.declared_type.as_deref()
    }

    fn path(&self) -> &str {
        &self.full_name
    }

    fn value(&self, kind: ValueKind) -> Result<Option<Value>, ConfigError> {
        if kind == ValueKind::Properties {
            return self.properties_value();
        }
        match self.section.get(&self.full_name) {
            Some(text) => kind.parse(&self.full_name, text).map(Some),
            None => Ok(None),
        }
    }

    fn dynamic_value(&self, kind: ValueKind) -> Option<Dynamic<Value>> {
        if !kind.is_scalar() {
            return None;
        }
        let read_source = Arc::clone(&self.source);
        let watch_source = Arc::clone(&self.source);
        let read_key = self.full_name.clone();
        let watch_key = self.full_name.clone();

        let parse = move |key: &str, text: String| match kind.parse(key, &text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("动态配置值无效，按缺失处理: {}", e);
                None
            }
        };
        let parse_on_change = parse.clone();

        Some(Dynamic::new(
            move || read_source.get(&read_key).and_then(|text| parse(&read_key, text)),
            move |callback| {
                let key = watch_key.clone();
                let parse = parse_on_change.clone();
                watch_source.watch(
                    &watch_key,
                    Arc::new(move |text: Option<String>| {
                        callback(text.and_then(|t| parse(&key, t)))
                    }),
                )
            },
        ))
    }

    fn child(&self, name: &str) -> Option<Arc<dyn ConfigurationNode>> {
        let full_name = join_key(&self.full_name, name);
        let section: BTreeMap<String, String> = self
            .section
            .iter()
            .filter(|(key, _)| is_at_or_under(key, &full_name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if section.is_empty() {
            return None;
        }
        let declared_type = section.get(&join_key(&full_name, TYPE_FIELD)).cloned();
        Some(Arc::new(PropertiesNode {
            id: None,
            declared_type,
            full_name,
            section: Arc::new(section),
            source: Arc::clone(&self.source),
        }))
    }

    fn is_single(&self) -> bool {
        self.section.contains_key(&self.full_name)
    }

    fn has_child(&self, name: &str) -> bool {
        let full_name = join_key(&self.full_name, name);
        self.section.keys().any(|key| is_at_or_under(key, &full_name))
    }

    fn unknown_properties(&self, supported: &BTreeSet<String>) -> BTreeSet<String> {
        let prefix = format!("{}.", self.full_name);
        self.section
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('.').next())
            .filter(|name| *name != TYPE_FIELD && !supported.contains(*name))
            .map(str::to_string)
            .collect()
    }

    fn fingerprint(&self) -> Fingerprint {
        let data = self
            .section
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        Fingerprint {
            id: self.id.clone(),
            declared_type: self.declared_type.clone(),
            data: serde_json::Value::Object(data),
        }
    }
}
