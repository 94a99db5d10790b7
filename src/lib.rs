// S3 Parallel Downloader
// 按字节范围并发下载对象存储中的单个大对象

// 配置管理模块
pub mod config;

// 下载引擎模块
pub mod downloader;

// 错误类型
pub mod error;

// 日志系统
pub mod logging;

// 对象存储后端（S3 / HTTP）
pub mod objstore;

// 导出常用类型
pub use config::{AppConfig, DownloadConfig};
pub use downloader::{DownloadOutcome, DownloadSession, DownloadStats};
pub use error::{DownloadError, FailedChunks, Result};
pub use objstore::{AuthMode, BackendRouter, ObjectBackend, ObjectLocator};
