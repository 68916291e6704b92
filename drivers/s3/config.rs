//! S3驱动配置

use serde::{Deserialize, Serialize};

/// S3配置
///
/// 不包含任何凭证字段：Access Key等由SDK默认凭证链提供
/// （环境变量、profile、IMDS）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// 存储桶名称（缺失时每个操作返回MissingRequiredOption）
    #[serde(default)]
    pub bucket: String,
    /// 区域
    /// 留空时由SDK凭证链/profile决定
    #[serde(default)]
    pub region: String,
    /// 端点地址
    /// AWS: 留空即可
    /// MinIO: http://localhost:9000
    /// 阿里云OSS: https://oss-{region}.aliyuncs.com
    #[serde(default)]
    pub endpoint: String,
    /// 命名空间前缀
    /// 所有键都放在该前缀之下，列举结果会去掉该前缀
    #[serde(default)]
    pub prefix: String,
    /// 强制使用路径风格（而非虚拟主机风格）
    /// MinIO等需要设置为true
    #[serde(default)]
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: String::new(),
            endpoint: String::new(),
            prefix: String::new(),
            force_path_style: false,
        }
    }
}
