// 配置管理模块

use crate::error::DownloadError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/s3pd.toml";

/// 共享内存目录（Linux），存在时作为临时下载目录
const SHM_DIR: &str = "/dev/shm";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// S3 配置
    #[serde(default)]
    pub s3: S3Config,
    /// HTTP 后端配置
    #[serde(default)]
    pub http: HttpConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 并发下载的分片数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 分片大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 单个分片失败后的重试次数（0 表示只尝试一次）
    #[serde(default)]
    pub max_retries: u32,
    /// 重试间隔（毫秒）
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// 临时下载目录，未设置时优先使用 /dev/shm
    #[serde(default)]
    pub ephemeral_dir: Option<PathBuf>,
    /// 是否跟随 #S3LINK# 链接对象
    #[serde(default = "default_follow_links")]
    pub follow_links: bool,
    /// 最大链接跳转层数
    #[serde(default = "default_max_link_depth")]
    pub max_link_depth: u32,
}

fn default_concurrency() -> usize {
    4
}

fn default_chunk_size() -> u64 {
    8 * 1024 * 1024 // 8MB
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_follow_links() -> bool {
    true
}

fn default_max_link_depth() -> u32 {
    10
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            chunk_size: default_chunk_size(),
            max_retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            ephemeral_dir: None,
            follow_links: default_follow_links(),
            max_link_depth: default_max_link_depth(),
        }
    }
}

impl DownloadConfig {
    /// 校验分片大小、并发数与链接层数
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.chunk_size == 0 {
            return Err(DownloadError::InvalidConfiguration(
                "分片大小必须大于 0".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(DownloadError::InvalidConfiguration(
                "并发数必须大于 0".to_string(),
            ));
        }
        if self.follow_links && self.max_link_depth == 0 {
            return Err(DownloadError::InvalidConfiguration(
                "跟随链接时最大链接层数必须大于 0".to_string(),
            ));
        }
        Ok(())
    }

    /// 重试间隔
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// 临时下载目录
    ///
    /// 优先级：配置项 > /dev/shm > 系统临时目录
    pub fn ephemeral_dir(&self) -> PathBuf {
        if let Some(dir) = &self.ephemeral_dir {
            return dir.clone();
        }
        let shm = Path::new(SHM_DIR);
        if shm.is_dir() {
            return shm.to_path_buf();
        }
        std::env::temp_dir()
    }
}

/// S3 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    /// 区域，未设置时使用环境默认值
    #[serde(default)]
    pub region: Option<String>,
    /// 自定义 endpoint（S3 兼容存储）
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// 使用 path-style 地址
    #[serde(default)]
    pub force_path_style: bool,
}

/// HTTP 后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// 单个请求超时（秒）
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    /// User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Signed 模式下使用的 Bearer Token
    #[serde(default)]
    pub bearer_token: Option<String>,
}

fn default_http_timeout_secs() -> u64 {
    600
}

fn default_user_agent() -> String {
    format!("s3pd/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
            bearer_token: None,
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// 加载配置，文件不存在时返回 `None`
    pub async fn load_optional(path: &Path) -> Result<Option<Self>> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }
        Self::load_from_file(path).await.map(Some)
    }
}
