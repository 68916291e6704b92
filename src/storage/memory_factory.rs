use anyhow::Result;
use serde_json::Value;

use super::{ConfigItem, DriverConfig, DriverFactory, KvDriver};
use crate::drivers::memory;

pub struct MemoryDriverFactory;

impl DriverFactory for MemoryDriverFactory {
    fn driver_type(&self) -> &'static str {
        "memory"
    }

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            name: "Memory".to_string(),
            supports_watch: false,
            read_only: false,
            default_prefix: None,
        }
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        // 进程内存储，无需额外配置 / in-process store, nothing to configure
        Vec::new()
    }

    fn create_driver(&self, _config: Value) -> Result<Box<dyn KvDriver>> {
        tracing::info!("Memory driver initialized");
        Ok(Box::new(memory::MemoryDriver::new()))
    }
}
