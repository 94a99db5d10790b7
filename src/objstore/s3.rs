// S3 后端实现

use crate::config::S3Config;
use crate::error::BackendError;
use crate::objstore::{range_header, AuthMode, ByteStream, ObjectBackend, ObjectLocator};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::Client;
use futures::StreamExt;
use std::ops::Range;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// 未配置区域且环境中也没有时使用的默认区域
const DEFAULT_REGION: &str = "us-east-1";

/// S3 对象存储后端
///
/// 按签名模式各持有一个客户端，首次使用时创建：
/// - Signed：使用默认凭证链
/// - Unsigned：不加载凭证，请求不签名
#[derive(Debug)]
pub struct S3Backend {
    config: S3Config,
    signed: OnceCell<Client>,
    unsigned: OnceCell<Client>,
}

impl S3Backend {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            signed: OnceCell::new(),
            unsigned: OnceCell::new(),
        }
    }

    /// 获取对应签名模式的客户端
    async fn client(&self, auth: AuthMode) -> &Client {
        let cell = match auth {
            AuthMode::Signed => &self.signed,
            AuthMode::Unsigned => &self.unsigned,
        };
        cell.get_or_init(|| self.build_client(auth)).await
    }

    async fn build_client(&self, auth: AuthMode) -> Client {
        let region = RegionProviderChain::first_try(self.config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(DEFAULT_REGION));

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
        if auth == AuthMode::Unsigned {
            loader = loader.no_credentials();
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.config.force_path_style);
        if let Some(endpoint) = &self.config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        info!(
            "创建 S3 客户端: 模式={:?}, 区域={:?}, endpoint={:?}",
            auth,
            sdk_config.region(),
            self.config.endpoint_url
        );

        Client::from_conf(builder.build())
    }
}

/// 将 SDK 错误映射为后端错误
///
/// 按 HTTP 状态码区分：HEAD 请求的错误响应没有 body，错误码不可用
fn classify_error<E>(err: SdkError<E, HttpResponse>, locator: &ObjectLocator) -> BackendError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err.raw_response().map(|resp| resp.status().as_u16()) {
        Some(404) => BackendError::NotFound(locator.to_string()),
        Some(401) | Some(403) => BackendError::AccessDenied(locator.to_string()),
        _ => BackendError::Transport(format!("{}: {}", locator, DisplayErrorContext(&err))),
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn head_object(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
    ) -> Result<u64, BackendError> {
        let output = self
            .client(auth)
            .await
            .head_object()
            .bucket(&locator.bucket)
            .key(&locator.key)
            .set_version_id(locator.version_id.clone())
            .send()
            .await
            .map_err(|e| classify_error(e, locator))?;

        let size = output
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| {
                BackendError::Transport(format!("{}: 响应缺少 Content-Length", locator))
            })?;

        debug!("HEAD {}: {} bytes", locator, size);
        Ok(size)
    }

    async fn get_range(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
        range: Range<u64>,
    ) -> Result<ByteStream, BackendError> {
        let output = self
            .client(auth)
            .await
            .get_object()
            .bucket(&locator.bucket)
            .key(&locator.key)
            .set_version_id(locator.version_id.clone())
            .range(range_header(&range))
            .send()
            .await
            .map_err(|e| classify_error(e, locator))?;

        let stream = futures::stream::unfold(output.body, |mut body| async move {
            body.next().await.map(|item| {
                let item = item
                    .map_err(|e| BackendError::Transport(format!("读取数据流失败: {}", e)));
                (item, body)
            })
        });

        Ok(stream.boxed())
    }
}
