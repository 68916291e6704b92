// Driver package / 驱动包
pub mod memory;
pub mod s3;

use crate::storage::StorageManager;

/// Register all drivers to StorageManager / 注册所有驱动
pub async fn register_all(manager: &StorageManager) -> anyhow::Result<()> {
    // Register memory driver (using MemoryDriverFactory from storage module) / 注册内存驱动
    manager
        .register_factory(Box::new(crate::storage::MemoryDriverFactory))
        .await?;
    // Register S3 object-store driver / 注册S3对象存储驱动
    manager
        .register_factory(Box::new(s3::S3DriverFactory))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_all() {
        let manager = StorageManager::new();
        register_all(&manager).await.unwrap();

        let mut types = manager.list_driver_types().await;
        types.sort();
        assert_eq!(types, vec!["memory".to_string(), "s3".to_string()]);
    }
}
