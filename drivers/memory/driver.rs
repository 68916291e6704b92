use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::storage::{ItemValue, KvDriver, StorageError};
use crate::utils::{is_sub_key, normalize_key};

/// Stored value variants / 存储的值变体
#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Raw(Bytes),
}

/// In-memory reference driver / 内存参考驱动
/// 进程内BTreeMap，键按规范化形式存储，列举顺序为键序
pub struct MemoryDriver {
    items: RwLock<BTreeMap<String, StoredValue>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvDriver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    async fn has_item(&self, key: &str) -> Result<bool, StorageError> {
        let items = self.items.read().await;
        Ok(items.contains_key(&normalize_key(key)))
    }

    async fn get_item(&self, key: &str) -> Result<Option<ItemValue>, StorageError> {
        let items = self.items.read().await;
        Ok(items.get(&normalize_key(key)).map(|value| match value {
            StoredValue::Text(text) => ItemValue::Text(text.clone()),
            StoredValue::Raw(data) => ItemValue::Text(String::from_utf8_lossy(data).into_owned()),
        }))
    }

    async fn get_item_raw(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let items = self.items.read().await;
        Ok(items.get(&normalize_key(key)).map(|value| match value {
            StoredValue::Text(text) => Bytes::from(text.clone().into_bytes()),
            StoredValue::Raw(data) => data.clone(),
        }))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.write().await;
        items.insert(normalize_key(key), StoredValue::Text(value.to_string()));
        Ok(())
    }

    async fn set_item_raw(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        let mut items = self.items.write().await;
        items.insert(normalize_key(key), StoredValue::Raw(value));
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut items = self.items.write().await;
        // 删除不存在的键不是错误 / removing an absent key is not an error
        items.remove(&normalize_key(key));
        Ok(())
    }

    async fn get_keys(&self, base: &str) -> Result<Vec<String>, StorageError> {
        let items = self.items.read().await;
        Ok(items
            .keys()
            .filter(|key| is_sub_key(base, key))
            .cloned()
            .collect())
    }

    async fn clear(&self, base: &str) -> Result<(), StorageError> {
        let mut items = self.items.write().await;
        items.retain(|key, _| !is_sub_key(base, key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_returns_sentinels() {
        let driver = MemoryDriver::new();
        assert!(!driver.has_item("nope").await.unwrap());
        assert!(driver.get_item("nope").await.unwrap().is_none());
        assert!(driver.get_item_raw("nope").await.unwrap().is_none());
        // 幂等删除 / idempotent remove
        driver.remove_item("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let driver = MemoryDriver::new();
        driver.set_item("a/1", "hello").await.unwrap();

        assert!(driver.has_item("a/1").await.unwrap());
        // 键按规范化形式比较 / keys compare in normalized form
        assert!(driver.has_item("/a//1").await.unwrap());
        assert_eq!(
            driver.get_item("a/1").await.unwrap(),
            Some(ItemValue::Text("hello".to_string()))
        );
        assert_eq!(
            driver.get_item_raw("a/1").await.unwrap().unwrap(),
            Bytes::from_static(b"hello")
        );

        driver.remove_item("a/1").await.unwrap();
        assert!(!driver.has_item("a/1").await.unwrap());
    }

    #[tokio::test]
    async fn test_raw_round_trip() {
        let driver = MemoryDriver::new();
        let payload = Bytes::from_static(&[0u8, 159, 146, 150]);
        driver.set_item_raw("bin", payload.clone()).await.unwrap();
        assert_eq!(driver.get_item_raw("bin").await.unwrap(), Some(payload));
    }

    #[tokio::test]
    async fn test_get_keys_filters_by_base() {
        let driver = MemoryDriver::new();
        driver.set_item("a/1", "1").await.unwrap();
        driver.set_item("a/2", "2").await.unwrap();
        driver.set_item("b/1", "3").await.unwrap();

        assert_eq!(
            driver.get_keys("").await.unwrap(),
            vec!["a/1".to_string(), "a/2".to_string(), "b/1".to_string()]
        );
        assert_eq!(
            driver.get_keys("a").await.unwrap(),
            vec!["a/1".to_string(), "a/2".to_string()]
        );
        // "a"不匹配"ab" / base "a" does not match "ab"
        driver.set_item("ab/1", "4").await.unwrap();
        assert_eq!(
            driver.get_keys("a").await.unwrap(),
            vec!["a/1".to_string(), "a/2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_clear_only_removes_base() {
        let driver = MemoryDriver::new();
        driver.set_item("a/1", "1").await.unwrap();
        driver.set_item("a/2", "2").await.unwrap();
        driver.set_item("b/1", "3").await.unwrap();

        driver.clear("a").await.unwrap();
        assert!(!driver.has_item("a/1").await.unwrap());
        assert!(!driver.has_item("a/2").await.unwrap());
        assert!(driver.has_item("b/1").await.unwrap());

        // 对空base再次clear清空全部 / clearing with empty base wipes the namespace
        driver.clear("").await.unwrap();
        assert!(driver.get_keys("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_returns_noop_handle() {
        use std::sync::Arc;

        let driver = MemoryDriver::new();
        let handle = driver.watch(Arc::new(|_, _| {})).unwrap();
        handle.unsubscribe();
    }
}
