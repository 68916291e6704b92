use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Watch callback type / 变更回调类型
/// 参数: (事件类型, 受影响的键) / Parameters: (event, affected key)
pub type WatchCallback = Arc<dyn Fn(WatchEvent, &str) + Send + Sync>;

/// Watch event kind / 变更事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    Update,
    Remove,
}

/// Watch unsubscribe handle / 取消订阅句柄
/// 不支持变更通知的驱动返回no-op句柄 / Drivers without notification support return a no-op handle
pub struct WatchHandle {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchHandle {
    /// No-op handle / 空操作句柄
    pub fn noop() -> Self {
        Self { unsubscribe: None }
    }

    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Cancel the subscription, consuming the handle / 取消订阅并消费句柄
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

/// Boxed error source carried by adapter errors / 适配器错误携带的底层原因
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Storage interface error vocabulary / 存储接口错误类型
///
/// "键不存在"不是错误：读操作返回None，存在性检查返回false。
/// Missing keys are never errors: reads return None, existence checks return false.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Required option absent, raised before any remote call / 缺少必填配置项
    #[error("[{driver}] missing required option `{option}`")]
    MissingRequiredOption {
        driver: &'static str,
        option: &'static str,
    },

    /// Remote call failed / 远端调用失败
    #[error("[{driver}] {operation} failed for key `{key}`: {source}")]
    Adapter {
        driver: &'static str,
        operation: &'static str,
        key: String,
        #[source]
        source: BoxedError,
    },
}

impl StorageError {
    pub fn missing_option(driver: &'static str, option: &'static str) -> Self {
        Self::MissingRequiredOption { driver, option }
    }

    pub fn adapter(
        driver: &'static str,
        operation: &'static str,
        key: impl Into<String>,
        source: impl Into<BoxedError>,
    ) -> Self {
        Self::Adapter {
            driver,
            operation,
            key: key.into(),
            source: source.into(),
        }
    }
}

/// Item value returned by get_item / 读取到的条目值
/// 声明为JSON内容且解析成功时返回Json变体，否则返回文本 / Json when the store
/// declared a JSON content type and parsing succeeded, Text otherwise
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ItemValue {
    Text(String),
    Json(serde_json::Value),
}

impl ItemValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ItemValue::Text(text) => Some(text),
            ItemValue::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ItemValue::Text(_) => None,
            ItemValue::Json(value) => Some(value),
        }
    }
}

/// Configuration item definition / 配置项定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigItem {
    pub name: String,
    /// Display title (friendly name) / 显示标题
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl ConfigItem {
    pub fn new(name: &str, item_type: &str) -> Self {
        Self {
            name: name.to_string(),
            title: None,
            item_type: item_type.to_string(),
            default: None,
            options: None,
            required: false,
            help: None,
        }
    }

    pub fn title(mut self, val: &str) -> Self {
        self.title = Some(val.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, val: &str) -> Self {
        self.default = Some(val.to_string());
        self
    }

    pub fn help(mut self, val: &str) -> Self {
        self.help = Some(val.to_string());
        self
    }

    pub fn options(mut self, val: &str) -> Self {
        self.options = Some(val.to_string());
        self
    }
}

/// Driver configuration information / 驱动配置信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub name: String,
    /// Driver supports change notification / 驱动支持变更通知
    #[serde(default)]
    pub supports_watch: bool,
    /// Driver is read-only / 驱动只读
    #[serde(default)]
    pub read_only: bool,
    /// Default namespace prefix / 默认命名空间前缀
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_prefix: Option<String>,
}

/// Complete driver information / 驱动完整信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverInfo {
    /// Common configuration items (mount_point, remark, etc.) / 通用配置项
    pub common: Vec<ConfigItem>,
    /// Driver-specific configuration items / 驱动特有配置项
    pub additional: Vec<ConfigItem>,
    /// Basic driver configuration / 驱动基本配置
    pub config: DriverConfig,
}

/// Generate common configuration items (defined in Core, shared by all drivers) / 生成通用配置项
pub fn get_common_items(config: &DriverConfig) -> Vec<ConfigItem> {
    let mut items = vec![
        ConfigItem::new("mount_point", "string")
            .required()
            .help("Mount point key prefix, must be unique"),
        ConfigItem::new("remark", "text").help("Remark/Notes"),
    ];

    if config.supports_watch {
        items.push(
            ConfigItem::new("watch_enabled", "bool")
                .default("false")
                .help("Dispatch change notifications to watchers"),
        );
    }

    items
}

/// Key-value driver interface (provides only primitive operations) / 键值驱动接口
#[async_trait]
pub trait KvDriver: Send + Sync {
    /// Driver name / 驱动名称
    fn name(&self) -> &str;

    /// Echo the mount options for introspection / 回显挂载配置
    fn options(&self) -> serde_json::Value;

    /// Check key existence / 检查键是否存在
    async fn has_item(&self, key: &str) -> Result<bool, StorageError>;

    /// Read value as text, parsing JSON when the store declares it / 读取文本值
    /// 键不存在返回None / Missing key returns None
    async fn get_item(&self, key: &str) -> Result<Option<ItemValue>, StorageError>;

    /// Read raw bytes without interpretation / 读取原始字节
    async fn get_item_raw(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

    /// Write text value, fully replacing any previous one / 写入文本值
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Write raw bytes / 写入原始字节
    async fn set_item_raw(&self, key: &str, value: Bytes) -> Result<(), StorageError>;

    /// Delete a single key (idempotent) / 删除单个键
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// List application keys under base ("" = whole namespace) / 列出base下的所有键
    async fn get_keys(&self, base: &str) -> Result<Vec<String>, StorageError>;

    /// Delete every key under base / 删除base下的所有键
    async fn clear(&self, base: &str) -> Result<(), StorageError>;

    /// Release driver resources. Default: nothing to release / 释放驱动资源
    async fn dispose(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Subscribe to change notifications. Default: unsupported, no-op handle / 订阅变更通知
    fn watch(&self, _callback: WatchCallback) -> Result<WatchHandle, StorageError> {
        Ok(WatchHandle::noop())
    }
}

pub mod manager;
pub mod memory_factory;

pub use manager::{DriverBox, DriverFactory, StorageManager};
pub use memory_factory::MemoryDriverFactory;
