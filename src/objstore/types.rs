// 对象存储数据类型

use crate::error::{BackendError, DownloadError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::ops::Range;
use url::Url;

/// Range GET 返回的数据流
pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

/// 存储协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScheme {
    S3,
    Http,
    Https,
}

impl StorageScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageScheme::S3 => "s3",
            StorageScheme::Http => "http",
            StorageScheme::Https => "https",
        }
    }

    fn from_str(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "s3" => Some(StorageScheme::S3),
            "http" => Some(StorageScheme::Http),
            "https" => Some(StorageScheme::Https),
            _ => None,
        }
    }
}

/// 请求签名模式
///
/// 每次请求都显式携带，不存在进程级的认证状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthMode {
    /// 携带凭证
    #[default]
    Signed,
    /// 匿名请求
    Unsigned,
}

impl AuthMode {
    pub fn from_unsigned_flag(unsigned: bool) -> Self {
        if unsigned {
            AuthMode::Unsigned
        } else {
            AuthMode::Signed
        }
    }
}

/// 对象定位信息
///
/// 对 S3 而言 `bucket` 是桶名；对 HTTP 而言是 `host[:port]`。
/// `key` 不含开头的 `/`。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocator {
    pub scheme: StorageScheme,
    pub bucket: String,
    pub key: String,
    /// 对象版本（仅 S3）
    pub version_id: Option<String>,
}

impl ObjectLocator {
    pub fn new(scheme: StorageScheme, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            scheme,
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
        }
    }

    /// 解析 `scheme://bucket/key` 形式的地址
    pub fn parse(url: &str) -> Result<Self, DownloadError> {
        let parsed = Url::parse(url)
            .map_err(|e| DownloadError::InvalidConfiguration(format!("无效的地址 {}: {}", url, e)))?;

        let scheme = StorageScheme::from_str(parsed.scheme()).ok_or_else(|| {
            DownloadError::InvalidConfiguration(format!(
                "不支持的协议 {}（支持 s3/http/https）",
                parsed.scheme()
            ))
        })?;

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DownloadError::InvalidConfiguration(format!("地址缺少桶名: {}", url)))?;

        let bucket = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let key = Self::key_from_url(scheme, url, &parsed)?;
        if key.is_empty() {
            return Err(DownloadError::InvalidConfiguration(format!(
                "地址缺少对象路径: {}",
                url
            )));
        }

        Ok(Self {
            scheme,
            bucket,
            key,
            version_id: None,
        })
    }

    /// 指定对象版本
    pub fn with_version(mut self, version_id: Option<String>) -> Self {
        self.version_id = version_id;
        self
    }

    /// 解析链接对象中的目标地址
    ///
    /// 目标地址省略桶名（如 `s3:///path` 或 `/path`）时，沿用当前桶
    pub fn resolve_link_target(&self, target: &str) -> Result<Self, DownloadError> {
        let target = target.trim();

        let (bucket, key) = match Url::parse(target) {
            Ok(parsed) => {
                let scheme = StorageScheme::from_str(parsed.scheme());
                if scheme != Some(self.scheme) {
                    return Err(DownloadError::LinkResolution(format!(
                        "链接目标协议不一致: {}",
                        target
                    )));
                }
                let bucket = parsed
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .map(|h| match parsed.port() {
                        Some(port) => format!("{}:{}", h, port),
                        None => h.to_string(),
                    })
                    .unwrap_or_else(|| self.bucket.clone());
                (bucket, Self::key_from_url(self.scheme, target, &parsed)?)
            }
            // 无协议的相对路径，视为当前桶内的 key
            Err(_) => (
                self.bucket.clone(),
                target.strip_prefix('/').unwrap_or(target).to_string(),
            ),
        };

        if key.is_empty() {
            return Err(DownloadError::LinkResolution(format!(
                "链接目标缺少对象路径: {}",
                target
            )));
        }

        Ok(Self {
            scheme: self.scheme,
            bucket,
            key,
            version_id: None,
        })
    }

    /// HTTP 请求地址（S3 地址原样拼接）
    pub fn http_url(&self) -> String {
        format!("{}://{}/{}", self.scheme.as_str(), self.bucket, self.key)
    }

    /// 从地址中取出 key，只去掉一个开头的 `/`
    ///
    /// S3 key 取自原始输入，不做 `.`/`..` 规范化，也不合并连续的 `/`
    fn key_from_url(
        scheme: StorageScheme,
        input: &str,
        parsed: &Url,
    ) -> Result<String, DownloadError> {
        match scheme {
            StorageScheme::S3 => {
                let path = raw_path(input);
                let path = path.strip_prefix('/').unwrap_or(path);
                urlencoding::decode(path)
                    .map(|key| key.into_owned())
                    .map_err(|e| {
                        DownloadError::InvalidConfiguration(format!("对象路径编码错误: {}", e))
                    })
            }
            StorageScheme::Http | StorageScheme::Https => {
                let path = parsed.path();
                let path = path.strip_prefix('/').unwrap_or(path);
                Ok(match parsed.query() {
                    Some(query) => format!("{}?{}", path, query),
                    None => path.to_string(),
                })
            }
        }
    }
}

/// `scheme://authority` 之后、查询串之前的原始路径
fn raw_path(input: &str) -> &str {
    let input = input.trim();
    let rest = input.split_once("://").map_or(input, |(_, rest)| rest);
    let rest = rest.split(|c: char| c == '?' || c == '#').next().unwrap_or("");
    match rest.find('/') {
        Some(start) => &rest[start..],
        None => "",
    }
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme.as_str(), self.bucket, self.key)?;
        if let Some(version) = &self.version_id {
            write!(f, " (version {})", version)?;
        }
        Ok(())
    }
}

/// 对象存储后端
///
/// 签名模式作为每次调用的参数传入
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// 查询对象大小（字节）
    async fn head_object(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
    ) -> Result<u64, BackendError>;

    /// 读取半开区间 `range` 内的字节
    async fn get_range(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
        range: Range<u64>,
    ) -> Result<ByteStream, BackendError>;
}

/// 构造 HTTP Range 头（闭区间）
pub fn range_header(range: &Range<u64>) -> String {
    format!("bytes={}-{}", range.start, range.end - 1)
}
