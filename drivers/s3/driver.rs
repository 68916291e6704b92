//! S3 KV驱动核心实现
//!
//! 设计原则：
//! - 只做接口语义到S3请求的翻译：不缓存、不重试、不做一致性协调
//! - 键映射 = 规范化 + 命名空间前缀，列举结果去前缀后返回
//! - 列举走continuation token分页循环，清空走DeleteObjects分批（每批最多1000键）
//! - 凭证、签名、重试、TLS全部交给aws-sdk

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::operation::get_object::GetObjectOutput;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::storage::{
    BoxedError, ItemValue, KvDriver, StorageError, WatchCallback, WatchHandle,
};
use crate::utils::normalize_key;

use super::config::S3Config;

/// 批量删除单批最大键数（DeleteObjects的上限）
const MAX_DELETE_BATCH: usize = 1000;

const DRIVER_TYPE: &str = "s3";

/// S3 KV驱动
pub struct S3Driver {
    config: S3Config,
    /// 解析后的命名空间前缀：空串或以/结尾
    prefix: String,
    /// 客户端句柄，首次使用时构造一次，之后复用
    client: Mutex<Option<Client>>,
    /// 客户端是否由外部传入（外部传入的句柄从不由驱动释放）
    client_supplied: bool,
}

impl S3Driver {
    /// 创建驱动实例，客户端按需构造
    pub fn new(config: S3Config) -> Self {
        let prefix = resolve_prefix(&config.prefix);
        Self {
            config,
            prefix,
            client: Mutex::new(None),
            client_supplied: false,
        }
    }

    /// 使用外部传入的客户端创建驱动实例
    pub fn with_client(config: S3Config, client: Client) -> Self {
        let prefix = resolve_prefix(&config.prefix);
        Self {
            config,
            prefix,
            client: Mutex::new(Some(client)),
            client_supplied: true,
        }
    }

    /// 应用键 → 对象键
    fn to_object_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, normalize_key(key))
    }

    /// 对象键 → 应用键（去掉命名空间前缀）
    fn from_object_key<'a>(&self, object_key: &'a str) -> &'a str {
        if self.prefix.is_empty() || object_key.is_empty() {
            return object_key;
        }
        // 不在本命名空间下的键原样返回（正常列举结果不会出现）
        object_key.strip_prefix(&self.prefix).unwrap_or(object_key)
    }

    /// bucket为必填项，缺失时在发起任何远端调用前失败
    fn require_bucket(&self) -> Result<&str, StorageError> {
        if self.config.bucket.is_empty() {
            return Err(StorageError::missing_option(DRIVER_TYPE, "bucket"));
        }
        Ok(&self.config.bucket)
    }

    /// 获取客户端，首次调用时根据region/endpoint构造
    async fn get_client(&self) -> Client {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return client.clone();
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if !self.config.region.is_empty() {
            loader = loader.region(Region::new(self.config.region.clone()));
        }
        if !self.config.endpoint.is_empty() {
            loader = loader.endpoint_url(self.config.endpoint.clone());
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if self.config.force_path_style {
            builder = builder.force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        tracing::debug!(
            "S3客户端已创建: bucket={}, region={}, endpoint={}",
            self.config.bucket,
            self.config.region,
            self.config.endpoint
        );

        *guard = Some(client.clone());
        client
    }

    /// 获取对象，NoSuchKey映射为None
    async fn fetch_object(&self, key: &str) -> Result<Option<GetObjectOutput>, StorageError> {
        let bucket = self.require_bucket()?;
        let object_key = self.to_object_key(key);
        let client = self.get_client().await;

        match client
            .get_object()
            .bucket(bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output)),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_no_such_key() {
                    // 键不存在是正常结果，不是错误
                    return Ok(None);
                }
                Err(adapter_error("get_object", key, err))
            }
        }
    }
}

/// 解析命名空间前缀：未配置时为空，否则规范化后补一个/
fn resolve_prefix(prefix: &str) -> String {
    let normalized = normalize_key(prefix);
    if normalized.is_empty() {
        String::new()
    } else {
        format!("{}/", normalized)
    }
}

/// 内容类型是否声明为JSON
fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    essence.eq_ignore_ascii_case("application/json")
        || essence.to_ascii_lowercase().ends_with("+json")
}

/// 按声明的内容类型决定返回变体：JSON尝试解析，失败降级为文本
fn decode_item(key: &str, content_type: Option<&str>, text: String) -> ItemValue {
    if content_type.is_some_and(is_json_content_type) {
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => return ItemValue::Json(value),
            Err(e) => {
                // JSON损坏不升级为错误，按文本返回
                tracing::warn!("S3对象声明为JSON但解析失败: key={}, 原因={}", key, e);
            }
        }
    }
    ItemValue::Text(text)
}

/// 批量删除的分批（顺序保持不变）
fn delete_batches(keys: &[String]) -> std::slice::Chunks<'_, String> {
    keys.chunks(MAX_DELETE_BATCH)
}

/// 记录并构造适配器错误：先打日志再向调用方抛出
fn adapter_error(
    operation: &'static str,
    key: &str,
    source: impl Into<BoxedError>,
) -> StorageError {
    let source = source.into();
    tracing::error!("S3 {}失败: key={}, 原因={}", operation, key, source);
    StorageError::adapter(DRIVER_TYPE, operation, key, source)
}

#[async_trait]
impl KvDriver for S3Driver {
    fn name(&self) -> &str {
        DRIVER_TYPE
    }

    fn options(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }

    async fn has_item(&self, key: &str) -> Result<bool, StorageError> {
        let bucket = self.require_bucket()?;
        let object_key = self.to_object_key(key);
        let client = self.get_client().await;

        match client
            .head_object()
            .bucket(bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_not_found() {
                    return Ok(false);
                }
                Err(adapter_error("head_object", key, err))
            }
        }
    }

    async fn get_item(&self, key: &str) -> Result<Option<ItemValue>, StorageError> {
        let output = match self.fetch_object(key).await? {
            Some(output) => output,
            None => return Ok(None),
        };

        let content_type = output.content_type().map(|s| s.to_string());
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| adapter_error("get_object", key, e))?
            .into_bytes();
        let text = String::from_utf8_lossy(&data).into_owned();

        Ok(Some(decode_item(key, content_type.as_deref(), text)))
    }

    async fn get_item_raw(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let output = match self.fetch_object(key).await? {
            Some(output) => output,
            None => return Ok(None),
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| adapter_error("get_object", key, e))?
            .into_bytes();
        Ok(Some(data))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let bucket = self.require_bucket()?;
        let object_key = self.to_object_key(key);
        let client = self.get_client().await;

        client
            .put_object()
            .bucket(bucket)
            .key(&object_key)
            .content_type("text/plain")
            .body(ByteStream::from(value.as_bytes().to_vec()))
            .send()
            .await
            .map_err(|e| adapter_error("put_object", key, e))?;
        Ok(())
    }

    async fn set_item_raw(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        let bucket = self.require_bucket()?;
        let object_key = self.to_object_key(key);
        let client = self.get_client().await;

        client
            .put_object()
            .bucket(bucket)
            .key(&object_key)
            .content_type("application/octet-stream")
            .body(ByteStream::from(value))
            .send()
            .await
            .map_err(|e| adapter_error("put_object", key, e))?;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let bucket = self.require_bucket()?;
        let object_key = self.to_object_key(key);
        let client = self.get_client().await;

        // DeleteObject本身幂等，不区分"已删除"与"本就不存在"
        client
            .delete_object()
            .bucket(bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| adapter_error("delete_object", key, e))?;
        Ok(())
    }

    async fn get_keys(&self, base: &str) -> Result<Vec<String>, StorageError> {
        let bucket = self.require_bucket()?;
        let filter = self.to_object_key(base);
        let client = self.get_client().await;

        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        // 分页必须串行：每页的continuation token依赖上一页响应
        loop {
            let mut request = client.list_objects_v2().bucket(bucket).prefix(&filter);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| adapter_error("list_objects", base, e))?;

            for object in response.contents() {
                if let Some(object_key) = object.key() {
                    let app_key = self.from_object_key(object_key);
                    if !app_key.is_empty() {
                        keys.push(app_key.to_string());
                    }
                }
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn clear(&self, base: &str) -> Result<(), StorageError> {
        let bucket = self.require_bucket()?.to_string();
        let keys = self.get_keys(base).await?;
        if keys.is_empty() {
            // 没有匹配的键，不发出任何删除请求
            return Ok(());
        }

        let client = self.get_client().await;

        for (batch_index, batch) in delete_batches(&keys).enumerate() {
            let offset = batch_index * MAX_DELETE_BATCH;

            let mut objects = Vec::with_capacity(batch.len());
            for app_key in batch {
                // 列举返回的是去前缀的应用键，删除前重新映射回对象键
                let object = ObjectIdentifier::builder()
                    .key(self.to_object_key(app_key))
                    .build()
                    .map_err(|e| adapter_error("delete_objects", app_key, e))?;
                objects.push(object);
            }

            let delete = Delete::builder()
                .set_objects(Some(objects))
                // quiet=false：响应包含每个对象的删除错误
                .quiet(false)
                .build()
                .map_err(|e| adapter_error("delete_objects", base, e))?;

            let response = client
                .delete_objects()
                .bucket(&bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| {
                    adapter_error(
                        "delete_objects",
                        &format!("{} (batch offset {})", base, offset),
                        e,
                    )
                })?;

            // 单个对象的删除错误只记录，不中断后续批次
            for err in response.errors() {
                tracing::warn!(
                    "S3批量删除部分失败: key={:?}, code={:?}, message={:?}",
                    err.key(),
                    err.code(),
                    err.message()
                );
            }

            tracing::debug!(
                "S3批量删除完成: base={}, 批次={}, 数量={}",
                base,
                batch_index,
                batch.len()
            );
        }

        Ok(())
    }

    async fn dispose(&self) -> Result<(), StorageError> {
        // 客户端句柄无需显式释放；外部传入的句柄归调用方所有，从不关闭
        if !self.client_supplied {
            tracing::debug!("S3驱动释放: 内部创建的客户端交由运行时回收");
        }
        Ok(())
    }

    fn watch(&self, _callback: WatchCallback) -> Result<WatchHandle, StorageError> {
        // S3不提供同步变更通知，返回no-op取消句柄
        tracing::debug!("S3驱动不支持watch");
        Ok(WatchHandle::noop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_with_prefix(prefix: &str) -> S3Driver {
        S3Driver::new(S3Config {
            bucket: "test-bucket".to_string(),
            prefix: prefix.to_string(),
            ..S3Config::default()
        })
    }

    #[test]
    fn test_object_key_round_trip_with_prefix() {
        let driver = driver_with_prefix("ns");
        assert_eq!(driver.to_object_key("a/1"), "ns/a/1");
        assert_eq!(driver.from_object_key("ns/a/1"), "a/1");

        for key in ["a", "a/1", "deep/nested/key"] {
            assert_eq!(driver.from_object_key(&driver.to_object_key(key)), key);
        }
    }

    #[test]
    fn test_object_key_without_prefix_is_normalized() {
        let driver = driver_with_prefix("");
        assert_eq!(driver.to_object_key("/a//b/"), normalize_key("/a//b/"));
        assert_eq!(driver.from_object_key("a/b"), "a/b");
    }

    #[test]
    fn test_prefix_is_normalized_once() {
        // 前缀自身也做规范化，且只追加一个分隔符
        let driver = driver_with_prefix("/ns//sub/");
        assert_eq!(driver.to_object_key("k"), "ns/sub/k");
        assert_eq!(driver.from_object_key("ns/sub/k"), "k");
    }

    #[test]
    fn test_from_object_key_defensive_fallback() {
        let driver = driver_with_prefix("ns");
        // 不属于本命名空间的对象键原样返回
        assert_eq!(driver.from_object_key("other/a"), "other/a");
        assert_eq!(driver.from_object_key(""), "");
    }

    #[test]
    fn test_object_key_mapping_tolerates_reapplication() {
        // clear会把get_keys返回的应用键重新过一遍to_object_key
        let driver = driver_with_prefix("ns");
        let object_key = driver.to_object_key("a/1");
        let app_key = driver.from_object_key(&object_key);
        assert_eq!(driver.to_object_key(app_key), object_key);
    }

    #[test]
    fn test_is_json_content_type() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("APPLICATION/JSON"));
        assert!(is_json_content_type("application/ld+json"));
        assert!(!is_json_content_type("text/plain"));
        assert!(!is_json_content_type("application/octet-stream"));
    }

    #[test]
    fn test_decode_item_content_type_branching() {
        // 声明JSON且可解析 → 结构化值
        let value = decode_item("k", Some("application/json"), r#"{"a":1}"#.to_string());
        assert_eq!(value, ItemValue::Json(serde_json::json!({"a": 1})));

        // 声明JSON但损坏 → 降级为原始文本
        let value = decode_item("k", Some("application/json"), "{broken".to_string());
        assert_eq!(value, ItemValue::Text("{broken".to_string()));

        // 未声明JSON → 文本，即使内容恰好是合法JSON
        let value = decode_item("k", Some("text/plain"), r#"{"a":1}"#.to_string());
        assert_eq!(value, ItemValue::Text(r#"{"a":1}"#.to_string()));

        let value = decode_item("k", None, "plain".to_string());
        assert_eq!(value, ItemValue::Text("plain".to_string()));
    }

    #[test]
    fn test_delete_batches_partition() {
        let keys: Vec<String> = (0..2500).map(|i| format!("k/{}", i)).collect();
        let sizes: Vec<usize> = delete_batches(&keys).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);

        // 顺序保持插入顺序
        let first_batch = delete_batches(&keys).next().unwrap();
        assert_eq!(first_batch[0], "k/0");
        assert_eq!(first_batch[999], "k/999");
    }

    #[tokio::test]
    async fn test_missing_bucket_fails_before_any_remote_call() {
        let driver = S3Driver::new(S3Config::default());

        let missing = |err: StorageError| {
            matches!(
                err,
                StorageError::MissingRequiredOption {
                    driver: "s3",
                    option: "bucket",
                }
            )
        };

        assert!(missing(driver.has_item("k").await.unwrap_err()));
        assert!(missing(driver.get_item("k").await.unwrap_err()));
        assert!(missing(driver.get_item_raw("k").await.unwrap_err()));
        assert!(missing(driver.set_item("k", "v").await.unwrap_err()));
        assert!(missing(
            driver
                .set_item_raw("k", Bytes::from_static(b"v"))
                .await
                .unwrap_err()
        ));
        assert!(missing(driver.remove_item("k").await.unwrap_err()));
        assert!(missing(driver.get_keys("").await.unwrap_err()));
        assert!(missing(driver.clear("").await.unwrap_err()));
    }

    #[tokio::test]
    async fn test_with_client_marks_handle_as_supplied() {
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();
        let client = Client::from_conf(conf);

        let driver = S3Driver::with_client(S3Config::default(), client);
        assert!(driver.client_supplied);
        // dispose对外部传入的客户端同样是no-op
        driver.dispose().await.unwrap();

        // bucket检查先于任何远端调用
        let err = driver.has_item("k").await.unwrap_err();
        assert!(matches!(err, StorageError::MissingRequiredOption { .. }));
    }

    #[test]
    fn test_options_echo_configuration() {
        let driver = driver_with_prefix("ns");
        let options = driver.options();
        assert_eq!(options["bucket"], "test-bucket");
        assert_eq!(options["prefix"], "ns");
        assert_eq!(options["force_path_style"], false);
    }

    #[test]
    fn test_watch_returns_noop_handle() {
        use std::sync::Arc;

        let driver = driver_with_prefix("");
        let handle = driver.watch(Arc::new(|_, _| {})).unwrap();
        handle.unsubscribe();
    }
}
