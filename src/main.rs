use anyhow::Context;
use clap::Parser;
use s3pd::{
    config::{AppConfig, DEFAULT_CONFIG_PATH},
    logging, AuthMode, BackendRouter, DownloadOutcome, DownloadSession, ObjectLocator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// 后处理回调类型
type PostProcess = fn(&Path) -> anyhow::Result<()>;

/// 按字节范围并发下载 S3 / HTTP 对象
#[derive(Debug, Parser)]
#[command(name = "s3pd", version, about)]
struct Cli {
    /// 源地址，如 s3://bucket/key 或 https://host/path
    source: String,

    /// 保存路径；省略时下载到临时目录后丢弃（用于测速）
    destination: Option<PathBuf>,

    /// 并发下载数（默认 4）
    #[arg(short = 'p', long = "processes")]
    processes: Option<usize>,

    /// 分片大小，单位字节（默认 8388608）
    #[arg(short = 'c', long = "chunksize")]
    chunksize: Option<u64>,

    /// 匿名访问（不签名请求）
    #[arg(short = 'u', long)]
    unsigned: bool,

    /// 对象版本
    #[arg(long)]
    version_id: Option<String>,

    /// 不跟随 #S3LINK# 链接对象
    #[arg(long)]
    no_follow_links: bool,

    /// 单个分片失败后的重试次数
    #[arg(long)]
    retries: Option<u32>,

    /// 配置文件路径
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

impl Cli {
    /// 命令行参数覆盖配置文件
    fn apply(&self, config: &mut AppConfig) {
        if let Some(processes) = self.processes {
            config.download.concurrency = processes;
        }
        if let Some(chunksize) = self.chunksize {
            config.download.chunk_size = chunksize;
        }
        if let Some(retries) = self.retries {
            config.download.max_retries = retries;
        }
        if self.no_follow_links {
            config.download.follow_links = false;
        }
    }
}

fn discard(_: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_optional(&cli.config)
        .await
        .with_context(|| format!("加载配置文件失败: {:?}", cli.config))?
        .unwrap_or_default();
    cli.apply(&mut config);

    let log_guard = logging::init_logging(&config.log);

    let locator = ObjectLocator::parse(&cli.source)?.with_version(cli.version_id.clone());
    let auth = AuthMode::from_unsigned_flag(cli.unsigned);
    let backend = Arc::new(BackendRouter::new(&config)?);

    info!(
        "下载 {} -> {} (并发数 {}, 分片大小 {})",
        locator,
        cli.destination
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "临时文件".to_string()),
        config.download.concurrency,
        config.download.chunk_size
    );

    let session = DownloadSession::new(backend, config.download);
    let post_process: Option<PostProcess> = match cli.destination {
        Some(_) => None,
        None => Some(discard),
    };

    let result = session
        .download(&locator, auth, cli.destination.clone(), post_process)
        .await;

    match result {
        Ok(DownloadOutcome::Saved(path)) => {
            println!("{}", path.display());
            Ok(())
        }
        Ok(DownloadOutcome::Processed(())) => Ok(()),
        Err(e) => {
            error!("{}", e);
            // exit 不会执行析构，先把日志刷到文件
            drop(log_guard);
            std::process::exit(1);
        }
    }
}
