use crate::config::DownloadConfig;
use crate::downloader::chunk::{partition, ChunkFetcher};
use crate::downloader::destination::{Destination, DownloadOutcome};
use crate::downloader::engine::DownloadEngine;
use crate::downloader::link::resolve_link;
use crate::downloader::progress::format_size;
use crate::error::Result;
use crate::objstore::{AuthMode, ObjectBackend, ObjectLocator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// 下载会话
///
/// 组合链接解析、目标准备、分片下载和收尾，是库的对外入口
pub struct DownloadSession {
    backend: Arc<dyn ObjectBackend>,
    config: DownloadConfig,
}

impl DownloadSession {
    pub fn new(backend: Arc<dyn ObjectBackend>, config: DownloadConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// 下载对象
    ///
    /// `destination` 与 `post_process` 必须且只能提供一个：
    /// - `destination`：下载到该路径，返回 `Saved`
    /// - `post_process`：下载到临时文件，回调返回值作为 `Processed`，随后删除临时文件
    pub async fn download<T, F>(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
        destination: Option<PathBuf>,
        post_process: Option<F>,
    ) -> Result<DownloadOutcome<T>>
    where
        F: FnOnce(&Path) -> anyhow::Result<T>,
    {
        self.config.validate()?;
        let destination = Destination::from_options(destination, post_process)?;

        let locator = if self.config.follow_links {
            resolve_link(
                self.backend.as_ref(),
                locator,
                auth,
                self.config.max_link_depth,
            )
            .await?
        } else {
            locator.clone()
        };

        let total_size = self.backend.head_object(&locator, auth).await?;
        info!("对象 {}: {}", locator, format_size(total_size));

        let target = destination
            .prepare(total_size, &self.config.ephemeral_dir())
            .await?;

        let result = match partition(total_size, self.config.chunk_size) {
            Ok(chunks) => {
                let fetcher = ChunkFetcher::new(self.backend.clone())
                    .with_retry(self.config.max_retries, self.config.retry_delay());
                DownloadEngine::new(fetcher, self.config.concurrency)
                    .run(&locator, auth, chunks, target.output())
                    .await
            }
            Err(e) => Err(e),
        };

        if let Ok(stats) = &result {
            info!("下载完成: {}, {}", locator, stats);
        }

        target.finalize(result.map(|_| ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, DownloadError};
    use crate::objstore::memory::MemoryBackend;
    use std::sync::atomic::Ordering;

    type Callback = fn(&Path) -> anyhow::Result<Vec<u8>>;

    fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }

    fn object(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn session(backend: Arc<MemoryBackend>, dir: &Path) -> DownloadSession {
        let config = DownloadConfig {
            concurrency: 3,
            chunk_size: 100,
            ephemeral_dir: Some(dir.join("shm")),
            ..Default::default()
        };
        DownloadSession::new(backend, config)
    }

    fn fixture(data: Vec<u8>) -> (Arc<MemoryBackend>, ObjectLocator) {
        let backend = Arc::new(MemoryBackend::new());
        let locator = ObjectLocator::parse("s3://bucket/path/object.bin").unwrap();
        backend.put(&locator, data);
        (backend, locator)
    }

    fn leftover_files(dir: &Path) -> usize {
        std::fs::read_dir(dir.join("shm"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_durable_download() {
        let data = object(1050);
        let (backend, locator) = fixture(data.clone());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.bin");

        let outcome = session(backend.clone(), dir.path())
            .download::<Vec<u8>, Callback>(&locator, AuthMode::Signed, Some(path.clone()), None)
            .await
            .unwrap();

        assert_eq!(outcome.saved_path(), Some(path.as_path()));
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(backend.get_calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_ephemeral_download_runs_callback() {
        let data = object(333);
        let (backend, locator) = fixture(data.clone());
        let dir = tempfile::tempdir().unwrap();

        let outcome = session(backend, dir.path())
            .download(&locator, AuthMode::Signed, None, Some(read_file as Callback))
            .await
            .unwrap();

        assert_eq!(outcome.into_processed(), Some(data));
        assert_eq!(leftover_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_object() {
        let (backend, locator) = fixture(Vec::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");

        session(backend.clone(), dir.path())
            .download::<Vec<u8>, Callback>(&locator, AuthMode::Signed, Some(path.clone()), None)
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        assert_eq!(backend.get_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_conflicting_destination_options() {
        let (backend, locator) = fixture(object(10));
        let dir = tempfile::tempdir().unwrap();

        let err = session(backend.clone(), dir.path())
            .download(
                &locator,
                AuthMode::Signed,
                Some(dir.path().join("out.bin")),
                Some(read_file as Callback),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::InvalidConfiguration(_)));
        assert_eq!(backend.head_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_chunk_size() {
        let (backend, locator) = fixture(object(10));
        let dir = tempfile::tempdir().unwrap();
        let config = DownloadConfig {
            chunk_size: 0,
            ..Default::default()
        };

        let err = DownloadSession::new(backend.clone(), config)
            .download::<Vec<u8>, Callback>(&locator, AuthMode::Signed, Some(dir.path().join("x")), None)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::InvalidConfiguration(_)));
        assert_eq!(backend.head_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let (backend, _) = fixture(object(10));
        let dir = tempfile::tempdir().unwrap();
        let missing = ObjectLocator::parse("s3://bucket/missing").unwrap();

        let err = session(backend, dir.path())
            .download::<Vec<u8>, Callback>(&missing, AuthMode::Signed, Some(dir.path().join("x")), None)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::ObjectNotFound(_)));
        assert!(!dir.path().join("x").exists());
    }

    #[tokio::test]
    async fn test_unsigned_access_denied() {
        let backend = Arc::new(MemoryBackend::new().require_signed());
        let locator = ObjectLocator::parse("s3://private/object").unwrap();
        backend.put(&locator, object(10));
        let dir = tempfile::tempdir().unwrap();

        let err = session(backend, dir.path())
            .download(&locator, AuthMode::Unsigned, None, Some(read_file as Callback))
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_ephemeral_removed_on_chunk_failure() {
        let (backend, locator) = fixture(object(500));
        backend.fail_range(200, BackendError::Transport("timeout".into()));
        let dir = tempfile::tempdir().unwrap();

        let err = session(backend, dir.path())
            .download(&locator, AuthMode::Signed, None, Some(read_file as Callback))
            .await
            .unwrap_err();

        let failed = err.failed_chunks().unwrap();
        assert!(failed.contains_range(&(200..300)));
        assert_eq!(leftover_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_retries_from_config() {
        let data = object(300);
        let (backend, locator) = fixture(data.clone());
        backend.fail_range_times(100, 1);
        let dir = tempfile::tempdir().unwrap();
        let config = DownloadConfig {
            chunk_size: 100,
            max_retries: 1,
            retry_delay_ms: 0,
            // 小对象会先被当作可能的链接读取一次
            follow_links: false,
            ..Default::default()
        };
        let path = dir.path().join("out.bin");

        DownloadSession::new(backend.clone(), config)
            .download::<Vec<u8>, Callback>(&locator, AuthMode::Signed, Some(path.clone()), None)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(backend.get_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_follows_link() {
        let data = object(250);
        let backend = Arc::new(MemoryBackend::new());
        let link = ObjectLocator::parse("s3://bucket/latest").unwrap();
        backend.put(&link, "#S3LINK#s3://archive/v2/data.bin");
        backend.put(&ObjectLocator::parse("s3://archive/v2/data.bin").unwrap(), data.clone());
        let dir = tempfile::tempdir().unwrap();

        let outcome = session(backend, dir.path())
            .download(&link, AuthMode::Signed, None, Some(read_file as Callback))
            .await
            .unwrap();

        assert_eq!(outcome.into_processed(), Some(data));
    }

    #[tokio::test]
    async fn test_link_not_followed_when_disabled() {
        let backend = Arc::new(MemoryBackend::new());
        let link = ObjectLocator::parse("s3://bucket/latest").unwrap();
        backend.put(&link, "#S3LINK#s3://archive/data.bin");
        let dir = tempfile::tempdir().unwrap();
        let config = DownloadConfig {
            follow_links: false,
            ephemeral_dir: Some(dir.path().join("shm")),
            ..Default::default()
        };

        let outcome = DownloadSession::new(backend, config)
            .download(&link, AuthMode::Signed, None, Some(read_file as Callback))
            .await
            .unwrap();

        assert_eq!(
            outcome.into_processed(),
            Some(b"#S3LINK#s3://archive/data.bin".to_vec())
        );
    }

    #[tokio::test]
    async fn test_link_depth_exceeded() {
        let backend = Arc::new(MemoryBackend::new());
        let a = ObjectLocator::parse("s3://bucket/a").unwrap();
        let b = ObjectLocator::parse("s3://bucket/b").unwrap();
        backend.put(&a, "#S3LINK#b");
        backend.put(&b, "#S3LINK#a");
        let dir = tempfile::tempdir().unwrap();

        let err = session(backend.clone(), dir.path())
            .download::<Vec<u8>, Callback>(&a, AuthMode::Signed, Some(dir.path().join("x")), None)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::LinkResolution(_)));
        assert_eq!(backend.get_calls.load(Ordering::SeqCst), 10);
    }
}
