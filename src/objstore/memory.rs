// 内存对象后端（测试用）
//
// 支持注入失败、短读和延迟，并统计并发请求数

use crate::error::BackendError;
use crate::objstore::{AuthMode, ByteStream, ObjectBackend, ObjectLocator};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: Mutex<HashMap<(String, String), Bytes>>,
    /// 分片起始偏移 -> 固定返回的错误
    failures: Mutex<HashMap<u64, BackendError>>,
    /// 分片起始偏移 -> 剩余的临时失败次数
    transient_failures: Mutex<HashMap<u64, usize>>,
    /// 只返回一半数据的分片起始偏移
    short_reads: Mutex<HashSet<u64>>,
    /// 请求时直接 panic 的分片起始偏移
    panics: Mutex<HashSet<u64>>,
    /// Unsigned 请求一律拒绝
    require_signed: bool,
    delay: Duration,

    pub head_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    requested: Mutex<Vec<Range<u64>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn require_signed(mut self) -> Self {
        self.require_signed = true;
        self
    }

    pub fn put(&self, locator: &ObjectLocator, data: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap()
            .insert((locator.bucket.clone(), locator.key.clone()), data.into());
    }

    pub fn fail_range(&self, start: u64, err: BackendError) {
        self.failures.lock().unwrap().insert(start, err);
    }

    pub fn fail_range_times(&self, start: u64, times: usize) {
        self.transient_failures.lock().unwrap().insert(start, times);
    }

    pub fn short_read(&self, start: u64) {
        self.short_reads.lock().unwrap().insert(start);
    }

    pub fn panic_on(&self, start: u64) {
        self.panics.lock().unwrap().insert(start);
    }

    /// 已请求过的范围（按请求顺序）
    pub fn requested_ranges(&self) -> Vec<Range<u64>> {
        self.requested.lock().unwrap().clone()
    }

    fn lookup(&self, locator: &ObjectLocator, auth: AuthMode) -> Result<Bytes, BackendError> {
        if self.require_signed && auth == AuthMode::Unsigned {
            return Err(BackendError::AccessDenied(locator.to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .get(&(locator.bucket.clone(), locator.key.clone()))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(locator.to_string()))
    }

    fn injected_failure(&self, start: u64) -> Option<BackendError> {
        if let Some(err) = self.failures.lock().unwrap().get(&start) {
            return Some(err.clone());
        }
        let mut transient = self.transient_failures.lock().unwrap();
        match transient.get_mut(&start) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Some(BackendError::Transport("connection reset".to_string()))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn head_object(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
    ) -> Result<u64, BackendError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lookup(locator, auth)?.len() as u64)
    }

    async fn get_range(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
        range: Range<u64>,
    ) -> Result<ByteStream, BackendError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(range.clone());

        let should_panic = self.panics.lock().unwrap().contains(&range.start);
        if should_panic {
            panic!("分片 bytes={}-{} 处理异常", range.start, range.end - 1);
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let data = self.lookup(locator, auth)?;
        if let Some(err) = self.injected_failure(range.start) {
            return Err(err);
        }

        let end = range.end.min(data.len() as u64);
        let mut slice = data.slice(range.start as usize..end as usize);
        if self.short_reads.lock().unwrap().contains(&range.start) {
            slice.truncate(slice.len() / 2);
        }

        // 拆成几段返回，模拟流式响应
        let mid = slice.len() / 2;
        let pieces = vec![slice.slice(..mid), slice.slice(mid..)];
        Ok(futures::stream::iter(pieces.into_iter().map(Ok)).boxed())
    }
}
