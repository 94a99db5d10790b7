//! 下载目标管理
//!
//! - 持久目标：下载到指定路径，失败时保留已写入的部分文件
//! - 临时目标：下载到临时目录（优先 /dev/shm），完成后把路径交给后处理回调，
//!   无论成功失败都删除临时文件

use crate::error::{ChunkError, DownloadError, Result};
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// 临时文件名前缀
const EPHEMERAL_PREFIX: &str = "s3-";

/// 已预分配的输出文件
///
/// 分片下载器只能通过它打开定位好的写入器，每个写入器只覆盖自己的字节范围
#[derive(Debug, Clone)]
pub struct OutputFile {
    path: PathBuf,
    size: u64,
}

impl OutputFile {
    pub(crate) fn new(path: PathBuf, size: u64) -> Self {
        Self { path, size }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// 打开写入器并定位到 `range.start`
    pub async fn open_writer(&self, range: Range<u64>) -> std::io::Result<RangeWriter> {
        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        Ok(RangeWriter {
            file,
            range,
            written: 0,
        })
    }
}

/// 单个分片的写入器
#[derive(Debug)]
pub struct RangeWriter {
    file: File,
    range: Range<u64>,
    written: u64,
}

impl RangeWriter {
    fn expected(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 写入数据，超出分片范围视为响应异常
    pub async fn write(&mut self, data: &[u8]) -> std::result::Result<(), ChunkError> {
        let received = self.written + data.len() as u64;
        if received > self.expected() {
            return Err(ChunkError::Transport(format!(
                "返回数据超出请求范围: 期望 {} bytes, 已收到 {} bytes",
                self.expected(),
                received
            )));
        }

        self.file
            .write_all(data)
            .await
            .map_err(|e| ChunkError::Io(e.to_string()))?;
        self.written = received;
        Ok(())
    }

    /// 刷新缓冲并校验写入长度
    pub async fn finish(mut self) -> std::result::Result<u64, ChunkError> {
        self.file
            .flush()
            .await
            .map_err(|e| ChunkError::Io(e.to_string()))?;

        if self.written != self.expected() {
            return Err(ChunkError::ShortRead {
                expected: self.expected(),
                actual: self.written,
            });
        }
        Ok(self.written)
    }
}

/// 下载目标选项（尚未创建文件）
#[derive(Debug)]
pub enum Destination<F> {
    /// 保存到指定路径
    Durable(PathBuf),
    /// 下载到临时文件，完成后调用回调
    Ephemeral(F),
}

impl<F> Destination<F> {
    /// 校验目标选项：路径和回调必须二选一
    pub fn from_options(path: Option<PathBuf>, post_process: Option<F>) -> Result<Self> {
        match (path, post_process) {
            (Some(path), None) => Ok(Destination::Durable(path)),
            (None, Some(post_process)) => Ok(Destination::Ephemeral(post_process)),
            (Some(_), Some(_)) => Err(DownloadError::InvalidConfiguration(
                "目标路径和后处理回调不能同时指定".to_string(),
            )),
            (None, None) => Err(DownloadError::InvalidConfiguration(
                "必须指定目标路径或后处理回调".to_string(),
            )),
        }
    }

    /// 创建输出文件并预分配到 `total_size`
    pub async fn prepare(self, total_size: u64, ephemeral_dir: &Path) -> Result<DownloadTarget<F>> {
        match self {
            Destination::Durable(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| DownloadError::io(format!("创建父目录失败 {:?}", parent), e))?;
                }

                let file = File::create(&path)
                    .await
                    .map_err(|e| DownloadError::io(format!("创建文件失败 {:?}", path), e))?;
                file.set_len(total_size)
                    .await
                    .map_err(|e| DownloadError::io(format!("预分配文件空间失败 {:?}", path), e))?;

                info!("文件准备完成: {:?}, 大小: {} bytes", path, total_size);
                Ok(DownloadTarget::Durable {
                    output: OutputFile::new(path, total_size),
                })
            }
            Destination::Ephemeral(post_process) => {
                tokio::fs::create_dir_all(ephemeral_dir).await.map_err(|e| {
                    DownloadError::io(format!("创建临时目录失败 {:?}", ephemeral_dir), e)
                })?;

                let dir = ephemeral_dir.to_path_buf();
                let temp = tokio::task::spawn_blocking(move || create_ephemeral(&dir, total_size))
                    .await
                    .map_err(|e| {
                        DownloadError::io(
                            "创建临时文件任务异常",
                            std::io::Error::new(std::io::ErrorKind::Other, e),
                        )
                    })??;

                info!("临时文件准备完成: {:?}, 大小: {} bytes", temp.path(), total_size);
                let output = OutputFile::new(temp.path().to_path_buf(), total_size);
                Ok(DownloadTarget::Ephemeral {
                    temp,
                    output,
                    post_process,
                })
            }
        }
    }
}

/// 在 `dir` 中创建临时文件并预分配（阻塞调用）
///
/// 预分配失败时 temp 被丢弃，文件随之删除
fn create_ephemeral(dir: &Path, total_size: u64) -> Result<NamedTempFile> {
    let temp = tempfile::Builder::new()
        .prefix(EPHEMERAL_PREFIX)
        .tempfile_in(dir)
        .map_err(|e| DownloadError::io(format!("创建临时文件失败 {:?}", dir), e))?;
    temp.as_file()
        .set_len(total_size)
        .map_err(|e| DownloadError::io(format!("预分配文件空间失败 {:?}", temp.path()), e))?;
    Ok(temp)
}

/// 已创建的下载目标
#[derive(Debug)]
pub enum DownloadTarget<F> {
    Durable {
        output: OutputFile,
    },
    Ephemeral {
        /// 丢弃时自动删除（包括回调 panic 的情况）
        temp: NamedTempFile,
        output: OutputFile,
        post_process: F,
    },
}

/// 下载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome<T> {
    /// 文件已保存到该路径
    Saved(PathBuf),
    /// 后处理回调的返回值
    Processed(T),
}

impl<T> DownloadOutcome<T> {
    pub fn saved_path(&self) -> Option<&Path> {
        match self {
            DownloadOutcome::Saved(path) => Some(path),
            DownloadOutcome::Processed(_) => None,
        }
    }

    pub fn into_processed(self) -> Option<T> {
        match self {
            DownloadOutcome::Processed(value) => Some(value),
            DownloadOutcome::Saved(_) => None,
        }
    }
}

impl<F> DownloadTarget<F> {
    pub fn output(&self) -> &OutputFile {
        match self {
            DownloadTarget::Durable { output } => output,
            DownloadTarget::Ephemeral { output, .. } => output,
        }
    }

    /// 根据下载结果收尾
    ///
    /// 临时目标在任何情况下都会删除文件；删除失败只记录日志，不覆盖原始结果
    pub fn finalize<T>(self, result: Result<()>) -> Result<DownloadOutcome<T>>
    where
        F: FnOnce(&Path) -> anyhow::Result<T>,
    {
        match self {
            DownloadTarget::Durable { output } => match result {
                Ok(()) => Ok(DownloadOutcome::Saved(output.path)),
                Err(e) => {
                    warn!("下载失败，保留部分文件: {:?}", output.path);
                    Err(e)
                }
            },
            DownloadTarget::Ephemeral {
                temp,
                output,
                post_process,
            } => {
                let outcome = result.and_then(|()| {
                    debug!("执行后处理回调: {:?}", output.path);
                    post_process(temp.path())
                        .map(DownloadOutcome::Processed)
                        .map_err(DownloadError::PostProcess)
                });

                match temp.close() {
                    Ok(()) => debug!("已删除临时文件: {:?}", output.path),
                    Err(e) => warn!("删除临时文件失败: {:?}, 错误: {}", output.path, e),
                }

                outcome
            }
        }
    }
}
