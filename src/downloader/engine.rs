use crate::downloader::chunk::{Chunk, ChunkFetcher, ChunkResult};
use crate::downloader::destination::OutputFile;
use crate::downloader::progress::{format_size, DownloadProgress, DownloadStats};
use crate::error::{ChunkError, ChunkFailure, DownloadError, FailedChunks, Result};
use crate::objstore::{AuthMode, ObjectLocator};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 下载引擎
///
/// 按分片顺序调度，同时运行的分片数不超过 `concurrency`。任一分片失败后
/// 停止调度新分片，已经开始的分片继续跑完，最后汇总所有失败原因
pub struct DownloadEngine {
    fetcher: ChunkFetcher,
    concurrency: usize,
}

impl DownloadEngine {
    pub fn new(fetcher: ChunkFetcher, concurrency: usize) -> Self {
        Self {
            fetcher,
            concurrency,
        }
    }

    pub async fn run(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
        chunks: Vec<Chunk>,
        output: &OutputFile,
    ) -> Result<DownloadStats> {
        if self.concurrency == 0 {
            return Err(DownloadError::InvalidConfiguration(
                "并发数必须大于 0".to_string(),
            ));
        }

        let total = chunks.len();
        let progress = Arc::new(DownloadProgress::new(output.size(), total));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        // 出现失败分片时触发，停止调度
        let failed = CancellationToken::new();

        info!(
            "开始并发下载 {} 个分片: {} ({}, 并发数 {})",
            total,
            locator,
            format_size(output.size()),
            self.concurrency
        );

        let mut handles: Vec<(Chunk, JoinHandle<ChunkResult>)> = Vec::with_capacity(total);
        let mut skipped = 0;
        let mut pending = chunks.into_iter();

        while let Some(chunk) = pending.next() {
            // 先拿到 permit 再创建任务，等待期间不会积压任务
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("获取 semaphore permit 失败，停止调度");
                    skipped = 1 + pending.len();
                    break;
                }
            };

            if failed.is_cancelled() {
                skipped = 1 + pending.len();
                warn!("已有分片失败，停止调度剩余 {} 个分片", skipped);
                break;
            }

            debug!(
                "调度分片 #{}: bytes={}-{}",
                chunk.index,
                chunk.range.start,
                chunk.range.end - 1
            );

            let fetcher = self.fetcher.clone();
            let locator = locator.clone();
            let output = output.clone();
            let progress = progress.clone();
            let failed = failed.clone();
            let task_chunk = chunk.clone();

            let handle = tokio::spawn(async move {
                // 任务失败或 panic 时都会触发，停止调度
                let failure_guard = failed.drop_guard();
                let result = fetcher.fetch(&locator, auth, task_chunk, &output).await;
                match &result.outcome {
                    Ok(written) => {
                        failure_guard.disarm();
                        let completed = progress.record_chunk(*written);
                        if progress.is_milestone(completed) {
                            info!(
                                "下载进度: {}/{} 个分片, {:.1}%",
                                completed,
                                progress.total_chunks(),
                                progress.percent()
                            );
                        }
                    }
                    Err(_) => drop(failure_guard),
                }
                drop(permit);
                result
            });

            handles.push((chunk, handle));
        }

        let mut failures = Vec::new();
        for (chunk, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result.outcome.map(|_| ()),
                Err(e) => {
                    error!("分片 #{} 任务异常退出: {}", chunk.index, e);
                    Err(ChunkError::Aborted(e.to_string()))
                }
            };
            if let Err(cause) = outcome {
                failures.push(ChunkFailure {
                    index: chunk.index,
                    range: chunk.range,
                    cause,
                });
            }
        }

        if failures.is_empty() && skipped == 0 {
            return Ok(progress.stats());
        }

        failures.sort_by_key(|f| f.index);
        let failed_chunks = FailedChunks {
            failures,
            skipped,
            total,
        };
        error!("下载失败: {}, {}", locator, failed_chunks);
        Err(DownloadError::DownloadFailed(failed_chunks))
    }
}
