use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{get_common_items, ConfigItem, DriverConfig, DriverInfo, KvDriver};
use crate::utils::normalize_key;

pub type DriverBox = Arc<Box<dyn KvDriver>>;

/// Driver factory trait / 驱动工厂 trait
pub trait DriverFactory: Send + Sync {
    /// Driver type name / 驱动类型名称
    fn driver_type(&self) -> &'static str;

    /// 创建驱动实例
    fn create_driver(&self, config: Value) -> Result<Box<dyn KvDriver>>;

    /// Return driver basic config / 返回驱动基本配置
    fn driver_config(&self) -> DriverConfig;

    /// Return driver specific config items / 返回驱动特有配置项
    fn additional_items(&self) -> Vec<ConfigItem>;

    /// Generate complete driver info (auto merge common + additional) / 生成完整的驱动信息
    fn driver_info(&self) -> DriverInfo {
        let config = self.driver_config();
        let common = get_common_items(&config);
        let additional = self.additional_items();
        DriverInfo {
            common,
            additional,
            config,
        }
    }
}

/// Storage manager (manages all mounted driver instances) / 存储管理器
#[derive(Clone)]
pub struct StorageManager {
    /// Mounted drivers (mount point -> driver) / 挂载的驱动实例
    mounts: Arc<RwLock<HashMap<String, DriverBox>>>,
    factories: Arc<RwLock<HashMap<String, Arc<Box<dyn DriverFactory>>>>>,
    /// Driver error status (mount point -> error message) / 驱动错误状态
    driver_errors: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageManager {
    pub fn new() -> Self {
        Self {
            mounts: Arc::new(RwLock::new(HashMap::new())),
            factories: Arc::new(RwLock::new(HashMap::new())),
            driver_errors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register driver factory / 注册驱动工厂
    pub async fn register_factory(&self, factory: Box<dyn DriverFactory>) -> Result<()> {
        let driver_type = factory.driver_type().to_string();
        let factory_box = Arc::new(factory);

        let mut factories = self.factories.write().await;
        factories.insert(driver_type.clone(), factory_box);

        tracing::info!("Driver factory registered: {}", driver_type);
        Ok(())
    }

    /// Create and mount driver instance (verify on success, record error on failure) / 创建并挂载驱动实例
    pub async fn create_driver(
        &self,
        mount_point: &str,
        driver_type: &str,
        config: Value,
    ) -> Result<String> {
        let mount_point = normalize_key(mount_point);
        let factories = self.factories.read().await;
        let factory = factories
            .get(driver_type)
            .ok_or_else(|| anyhow!("Driver type not found: {}", driver_type))?;

        match factory.create_driver(config) {
            Ok(driver) => {
                let driver_box: DriverBox = Arc::new(driver);

                drop(factories);

                // Verify driver validity: probe the key listing / 验证驱动有效性：探测键列表
                let validation_result = driver_box.get_keys("").await;

                let mut mounts = self.mounts.write().await;
                mounts.insert(mount_point.clone(), driver_box);
                drop(mounts);

                match validation_result {
                    Ok(_) => {
                        // Verification successful, clear error / 验证成功
                        let mut errors = self.driver_errors.write().await;
                        errors.remove(&mount_point);
                        tracing::info!(
                            "Driver created and verified: {} ({})",
                            mount_point,
                            driver_type
                        );
                    }
                    Err(e) => {
                        // Verification failed, record error (but driver still mounted) / 验证失败
                        let error_msg = e.to_string();
                        let mut errors = self.driver_errors.write().await;
                        errors.insert(mount_point.clone(), error_msg.clone());
                        tracing::warn!(
                            "Driver created but verification failed: {} ({}) - {}",
                            mount_point,
                            driver_type,
                            error_msg
                        );
                    }
                }

                Ok(mount_point)
            }
            Err(e) => {
                drop(factories);
                // Record error / 记录错误
                let error_msg = e.to_string();
                let mut errors = self.driver_errors.write().await;
                errors.insert(mount_point.clone(), error_msg.clone());

                tracing::error!(
                    "Driver creation failed: {} ({}) - {}",
                    mount_point,
                    driver_type,
                    error_msg
                );
                Err(e)
            }
        }
    }

    /// Get driver error status / 获取驱动错误状态
    pub async fn get_driver_error(&self, mount_point: &str) -> Option<String> {
        let errors = self.driver_errors.read().await;
        errors.get(mount_point).cloned()
    }

    /// Get all driver error statuses / 获取所有驱动错误状态
    pub async fn get_all_driver_errors(&self) -> HashMap<String, String> {
        let errors = self.driver_errors.read().await;
        errors.clone()
    }

    /// Get driver instance / 获取驱动实例
    pub async fn get_driver(&self, mount_point: &str) -> Option<DriverBox> {
        let mounts = self.mounts.read().await;
        mounts.get(&normalize_key(mount_point)).cloned()
    }

    /// Unmount driver instance / 卸载驱动实例
    pub async fn remove_driver(&self, mount_point: &str) -> Result<()> {
        let mount_point = normalize_key(mount_point);
        let driver = {
            let mut mounts = self.mounts.write().await;
            mounts
                .remove(&mount_point)
                .ok_or_else(|| anyhow!("Driver not found: {}", mount_point))?
        };

        driver.dispose().await?;

        tracing::info!("Driver removed: {}", mount_point);
        Ok(())
    }

    /// List all mount points / 列出所有挂载点
    pub async fn list_mounts(&self) -> Vec<String> {
        let mounts = self.mounts.read().await;
        mounts.keys().cloned().collect()
    }

    /// List all available driver types / 列出所有可用的驱动类型
    pub async fn list_driver_types(&self) -> Vec<String> {
        let factories = self.factories.read().await;
        factories.keys().cloned().collect()
    }

    /// Get all driver factory instances / 获取所有驱动工厂实例
    pub async fn get_all_factories(&self) -> Vec<Arc<Box<dyn DriverFactory>>> {
        let factories = self.factories.read().await;
        factories.values().cloned().collect()
    }

    /// Resolve key to corresponding driver and relative key
    /// Returns (driver instance, relative key) / 根据键解析到对应的驱动和相对键
    pub async fn resolve_key(&self, key: &str) -> Option<(DriverBox, String)> {
        let key = normalize_key(key);
        let mounts = self.mounts.read().await;

        // Find the longest matching mount point / 找到最长匹配的挂载点
        let mut best_match: Option<(&String, &DriverBox)> = None;

        for (mount_point, driver) in mounts.iter() {
            let matches = mount_point.is_empty()
                || key == *mount_point
                || key.starts_with(&format!("{}/", mount_point));
            if !matches {
                continue;
            }

            if best_match
                .map(|(best, _)| best.len() < mount_point.len())
                .unwrap_or(true)
            {
                best_match = Some((mount_point, driver));
            }
        }

        best_match.map(|(mount_point, driver)| {
            let relative = key
                .strip_prefix(mount_point.as_str())
                .unwrap_or(&key)
                .trim_start_matches('/')
                .to_string();
            (driver.clone(), relative)
        })
    }

    /// Get all mounted drivers (for iteration) / 获取所有挂载的驱动实例
    pub async fn get_all_mounts(&self) -> Vec<(String, DriverBox)> {
        let mounts = self.mounts.read().await;
        mounts.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
