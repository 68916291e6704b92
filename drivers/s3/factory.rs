//! S3驱动工厂

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::storage::{ConfigItem, DriverConfig, DriverFactory, KvDriver};

use super::config::S3Config;
use super::driver::S3Driver;

/// S3驱动工厂
pub struct S3DriverFactory;

impl DriverFactory for S3DriverFactory {
    fn driver_type(&self) -> &'static str {
        "s3"
    }

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            name: "S3".to_string(),
            // 对象存储不提供同步变更通知
            supports_watch: false,
            read_only: false,
            default_prefix: None,
        }
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        vec![
            ConfigItem::new("bucket", "string")
                .title("存储桶名称")
                .help("S3存储桶名称")
                .required(),
            ConfigItem::new("region", "string")
                .title("区域")
                .help("S3区域，如 us-east-1、cn-hangzhou；留空由SDK凭证链决定"),
            ConfigItem::new("endpoint", "string")
                .title("端点地址")
                .help("S3端点URL（MinIO: http://localhost:9000），AWS留空"),
            ConfigItem::new("prefix", "string")
                .title("命名空间前缀")
                .help("所有键都放在该前缀之下，列举结果自动去前缀"),
            ConfigItem::new("force_path_style", "bool")
                .title("强制路径风格")
                .help("MinIO等需要开启此选项")
                .default("false"),
        ]
    }

    fn create_driver(&self, config: Value) -> Result<Box<dyn KvDriver>> {
        // bucket缺失不在这里拒绝：按接口契约在调用时报MissingRequiredOption
        let config: S3Config =
            serde_json::from_value(config).map_err(|e| anyhow!("配置解析失败: {}", e))?;
        Ok(Box::new(S3Driver::new(config)))
    }
}
