//! 错误类型定义
//!
//! 分三层：
//! - `BackendError`：对象存储后端返回的错误（HEAD / Range GET）
//! - `ChunkError`：单个分片下载失败的原因，由协调器收集，不会中断其他分片
//! - `DownloadError`：一次下载的最终错误

use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// 下载结果类型别名
pub type Result<T> = std::result::Result<T, DownloadError>;

/// 汇总错误中最多展示的失败原因数量
const MAX_REPORTED_CAUSES: usize = 5;

/// 对象存储后端错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// 对象不存在
    #[error("对象不存在: {0}")]
    NotFound(String),

    /// 无访问权限
    #[error("访问被拒绝: {0}")]
    AccessDenied(String),

    /// 网络错误或响应格式异常
    #[error("传输错误: {0}")]
    Transport(String),
}

/// 单个分片的失败原因
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("访问被拒绝: {0}")]
    AccessDenied(String),

    #[error("对象不存在: {0}")]
    NotFound(String),

    #[error("传输错误: {0}")]
    Transport(String),

    /// 实际写入的字节数少于分片长度
    #[error("数据不完整: 期望 {expected} bytes, 实际 {actual} bytes")]
    ShortRead { expected: u64, actual: u64 },

    /// 本地文件写入失败
    #[error("写入文件失败: {0}")]
    Io(String),

    /// 分片任务异常退出（panic）
    #[error("分片任务异常: {0}")]
    Aborted(String),
}

impl ChunkError {
    /// 是否值得重试（权限和不存在的错误重试也不会成功）
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ChunkError::AccessDenied(_) | ChunkError::NotFound(_))
    }
}

impl From<BackendError> for ChunkError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(msg) => ChunkError::NotFound(msg),
            BackendError::AccessDenied(msg) => ChunkError::AccessDenied(msg),
            BackendError::Transport(msg) => ChunkError::Transport(msg),
        }
    }
}

/// 单个失败分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    /// 分片索引
    pub index: usize,
    /// 字节范围
    pub range: Range<u64>,
    /// 失败原因
    pub cause: ChunkError,
}

/// 失败分片汇总
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChunks {
    /// 失败的分片（按索引排序）
    pub failures: Vec<ChunkFailure>,
    /// 因出现失败而未调度的分片数
    pub skipped: usize,
    /// 分片总数
    pub total: usize,
}

impl FailedChunks {
    /// 是否包含指定范围的失败
    pub fn contains_range(&self, range: &Range<u64>) -> bool {
        self.failures.iter().any(|f| &f.range == range)
    }
}

impl fmt::Display for FailedChunks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} 个分片下载失败",
            self.failures.len(),
            self.total
        )?;
        if self.skipped > 0 {
            write!(f, "，{} 个分片未调度", self.skipped)?;
        }

        for failure in self.failures.iter().take(MAX_REPORTED_CAUSES) {
            write!(
                f,
                "\n  - 分片 #{} bytes=[{}, {}): {}",
                failure.index, failure.range.start, failure.range.end, failure.cause
            )?;
        }
        if self.failures.len() > MAX_REPORTED_CAUSES {
            write!(
                f,
                "\n  ... 另有 {} 个失败分片",
                self.failures.len() - MAX_REPORTED_CAUSES
            )?;
        }
        Ok(())
    }
}

/// 下载错误
#[derive(Debug, Error)]
pub enum DownloadError {
    /// 参数配置错误（分片大小、并发数、目标选项冲突等）
    #[error("配置错误: {0}")]
    InvalidConfiguration(String),

    /// 元数据查询时对象不存在
    #[error("对象不存在: {0}")]
    ObjectNotFound(String),

    /// 元数据查询时访问被拒绝
    #[error("访问被拒绝: {0}")]
    AccessDenied(String),

    /// 元数据查询时的网络错误
    #[error("传输错误: {0}")]
    Transport(String),

    /// 链接对象解析失败
    #[error("链接解析失败: {0}")]
    LinkResolution(String),

    /// 一个或多个分片下载失败
    #[error("下载失败: {0}")]
    DownloadFailed(FailedChunks),

    /// 本地文件系统错误
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// 后处理回调返回错误
    #[error("后处理回调失败: {0:#}")]
    PostProcess(anyhow::Error),
}

impl DownloadError {
    /// 构造带上下文的 IO 错误
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DownloadError::Io {
            context: context.into(),
            source,
        }
    }

    /// 返回失败分片汇总（仅 `DownloadFailed`）
    pub fn failed_chunks(&self) -> Option<&FailedChunks> {
        match self {
            DownloadError::DownloadFailed(failed) => Some(failed),
            _ => None,
        }
    }
}

impl From<BackendError> for DownloadError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(msg) => DownloadError::ObjectNotFound(msg),
            BackendError::AccessDenied(msg) => DownloadError::AccessDenied(msg),
            BackendError::Transport(msg) => DownloadError::Transport(msg),
        }
    }
}
