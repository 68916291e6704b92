//! S3对象存储KV驱动

pub mod config;
pub mod driver;
pub mod factory;

pub use config::S3Config;
pub use driver::S3Driver;
pub use factory::S3DriverFactory;
