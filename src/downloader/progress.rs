use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// 下载进度（多个分片任务并发更新）
#[derive(Debug)]
pub struct DownloadProgress {
    total_bytes: u64,
    total_chunks: usize,
    downloaded: AtomicU64,
    completed: AtomicUsize,
    started: Instant,
}

impl DownloadProgress {
    pub fn new(total_bytes: u64, total_chunks: usize) -> Self {
        Self {
            total_bytes,
            total_chunks,
            downloaded: AtomicU64::new(0),
            completed: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    /// 记录一个完成的分片，返回已完成的分片数
    pub fn record_chunk(&self, bytes: u64) -> usize {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn completed_chunks(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// 下载进度百分比
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.downloaded_bytes() as f64 / self.total_bytes as f64 * 100.0
    }

    /// 是否应该输出一次进度日志（大约每 10% 一次）
    pub fn is_milestone(&self, completed: usize) -> bool {
        let step = (self.total_chunks / 10).max(1);
        completed % step == 0 || completed == self.total_chunks
    }

    pub fn stats(&self) -> DownloadStats {
        DownloadStats {
            total_bytes: self.downloaded_bytes(),
            chunk_count: self.completed_chunks(),
            elapsed: self.started.elapsed(),
        }
    }
}

/// 下载统计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadStats {
    pub total_bytes: u64,
    pub chunk_count: usize,
    pub elapsed: Duration,
}

impl DownloadStats {
    /// 平均速度（字节/秒）
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / secs
    }
}

impl fmt::Display for DownloadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {} 个分片, 耗时 {:.2}s, 平均速度 {}/s",
            format_size(self.total_bytes),
            self.chunk_count,
            self.elapsed.as_secs_f64(),
            format_size(self.throughput() as u64)
        )
    }
}

/// 格式化字节数
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}
