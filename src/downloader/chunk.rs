use crate::downloader::destination::OutputFile;
use crate::error::{ChunkError, DownloadError, Result};
use crate::objstore::{AuthMode, ObjectBackend, ObjectLocator};
use futures::StreamExt;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 分片信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 分片索引
    pub index: usize,
    /// 字节范围（半开区间）
    pub range: Range<u64>,
}

impl Chunk {
    pub fn new(index: usize, range: Range<u64>) -> Self {
        Self { index, range }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }
}

/// 计算分片
///
/// 除最后一个分片外，每个分片大小都等于 `chunk_size`；
/// `total_size == 0` 时返回空列表
pub fn partition(total_size: u64, chunk_size: u64) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(DownloadError::InvalidConfiguration(
            "分片大小必须大于 0".to_string(),
        ));
    }

    let mut chunks = Vec::with_capacity(total_size.div_ceil(chunk_size) as usize);
    let mut offset = 0u64;

    while offset < total_size {
        let end = offset.saturating_add(chunk_size).min(total_size);
        chunks.push(Chunk::new(chunks.len(), offset..end));
        offset = end;
    }

    Ok(chunks)
}

/// 单个分片的下载结果
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub chunk: Chunk,
    /// 成功时为写入的字节数
    pub outcome: std::result::Result<u64, ChunkError>,
}

impl ChunkResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// 分片下载器
///
/// 下载一个字节范围并写入输出文件的对应偏移。所有错误都转换为
/// `ChunkResult` 中的失败原因，不会向外传播
#[derive(Clone)]
pub struct ChunkFetcher {
    backend: Arc<dyn ObjectBackend>,
    /// 失败后的重试次数（0 表示只尝试一次）
    max_retries: u32,
    retry_delay: Duration,
}

impl ChunkFetcher {
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self {
            backend,
            max_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// 下载分片
    pub async fn fetch(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
        chunk: Chunk,
        output: &OutputFile,
    ) -> ChunkResult {
        let mut retries = 0;

        loop {
            let started = Instant::now();
            match self.fetch_once(locator, auth, &chunk, output).await {
                Ok(written) => {
                    debug!(
                        "✓ 分片 #{} 下载成功: bytes={}-{}, 耗时 {}ms",
                        chunk.index,
                        chunk.range.start,
                        chunk.range.end - 1,
                        started.elapsed().as_millis()
                    );
                    return ChunkResult {
                        chunk,
                        outcome: Ok(written),
                    };
                }
                Err(e) if e.is_retryable() && retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        "⚠ 分片 #{} 下载失败，重试 ({}/{}): {}",
                        chunk.index, retries, self.max_retries, e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    warn!("✗ 分片 #{} 下载失败: {}", chunk.index, e);
                    return ChunkResult {
                        chunk,
                        outcome: Err(e),
                    };
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
        chunk: &Chunk,
        output: &OutputFile,
    ) -> std::result::Result<u64, ChunkError> {
        let mut stream = self
            .backend
            .get_range(locator, auth, chunk.range.clone())
            .await?;

        let mut writer = output
            .open_writer(chunk.range.clone())
            .await
            .map_err(|e| ChunkError::Io(e.to_string()))?;

        while let Some(data) = stream.next().await {
            writer.write(&data?).await?;
        }

        writer.finish().await
    }
}
