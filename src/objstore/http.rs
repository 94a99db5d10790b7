// HTTP(S) 后端实现
//
// 适用于支持 Range 请求的普通 HTTP 服务器或预签名地址

use crate::config::HttpConfig;
use crate::error::BackendError;
use crate::objstore::{range_header, AuthMode, ByteStream, ObjectBackend, ObjectLocator};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, RANGE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::ops::Range;
use std::time::Duration;
use tracing::debug;

/// HTTP 对象后端
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    /// Signed 模式下附加的 Bearer Token
    bearer_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            bearer_token: config.bearer_token.clone(),
        })
    }

    /// 按签名模式附加凭证（Unsigned 不携带任何认证头）
    fn authorize(&self, request: RequestBuilder, auth: AuthMode) -> RequestBuilder {
        match (auth, &self.bearer_token) {
            (AuthMode::Signed, Some(token)) => {
                request.header(AUTHORIZATION, format!("Bearer {}", token))
            }
            _ => request,
        }
    }

    /// 检查响应状态码
    fn check_status(resp: &Response, locator: &ObjectLocator) -> Result<(), BackendError> {
        let status = resp.status();
        match status {
            StatusCode::NOT_FOUND => Err(BackendError::NotFound(locator.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(BackendError::AccessDenied(locator.to_string()))
            }
            s if s.is_success() => Ok(()),
            s => Err(BackendError::Transport(format!("{}: HTTP错误 {}", locator, s))),
        }
    }
}

#[async_trait]
impl ObjectBackend for HttpBackend {
    async fn head_object(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
    ) -> Result<u64, BackendError> {
        let request = self.authorize(self.client.head(locator.http_url()), auth);
        let resp = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(format!("发送HTTP请求失败: {}", e)))?;

        Self::check_status(&resp, locator)?;

        // HEAD 响应没有 body，不能依赖 Response::content_length
        let size = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
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
        let request = self
            .client
            .get(locator.http_url())
            .header(RANGE, range_header(&range));
        let resp = self
            .authorize(request, auth)
            .send()
            .await
            .map_err(|e| BackendError::Transport(format!("发送HTTP请求失败: {}", e)))?;

        Self::check_status(&resp, locator)?;

        // 200 表示服务器忽略了 Range，只有从 0 开始的分片可以直接使用
        if resp.status() != StatusCode::PARTIAL_CONTENT && range.start != 0 {
            return Err(BackendError::Transport(format!(
                "{}: 服务器不支持 Range 请求 (HTTP {})",
                locator,
                resp.status()
            )));
        }

        let stream = resp
            .bytes_stream()
            .map(|item| item.map_err(|e| BackendError::Transport(format!("读取数据流失败: {}", e))));

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(token: Option<&str>) -> HttpBackend {
        HttpBackend::new(&HttpConfig {
            bearer_token: token.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
    }

    fn locator(server: &MockServer) -> ObjectLocator {
        ObjectLocator::parse(&format!("{}/data.bin", server.uri())).unwrap()
    }

    async fn read_all(stream: ByteStream) -> Vec<u8> {
        stream
            .map_ok(|bytes| bytes.to_vec())
            .try_concat()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_head_returns_size() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/data.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1234]))
            .mount(&server)
            .await;

        let size = backend(None)
            .head_object(&locator(&server), AuthMode::Signed)
            .await
            .unwrap();
        assert_eq!(size, 1234);
    }

    #[tokio::test]
    async fn test_get_partial_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.bin"))
            .and(header("range", "bytes=8-15"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"abcdefgh".to_vec()))
            .mount(&server)
            .await;

        let stream = backend(None)
            .get_range(&locator(&server), AuthMode::Signed, 8..16)
            .await
            .unwrap();
        assert_eq!(read_all(stream).await, b"abcdefgh");
    }

    #[tokio::test]
    async fn test_full_response_only_accepted_from_start() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"whole".to_vec()))
            .mount(&server)
            .await;

        let backend = backend(None);
        let stream = backend
            .get_range(&locator(&server), AuthMode::Signed, 0..5)
            .await
            .unwrap();
        assert_eq!(read_all(stream).await, b"whole");

        let err = backend
            .get_range(&locator(&server), AuthMode::Signed, 8..16)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Transport(_)));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        for (name, status) in [("/missing", 404), ("/forbidden", 403), ("/unauthorized", 401)] {
            Mock::given(path(name))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }
        let backend = backend(None);
        let at = |name: &str| ObjectLocator::parse(&format!("{}{}", server.uri(), name)).unwrap();

        assert!(matches!(
            backend.head_object(&at("/missing"), AuthMode::Signed).await,
            Err(BackendError::NotFound(_))
        ));
        assert!(matches!(
            backend.head_object(&at("/forbidden"), AuthMode::Signed).await,
            Err(BackendError::AccessDenied(_))
        ));
        assert!(matches!(
            backend
                .get_range(&at("/unauthorized"), AuthMode::Signed, 0..4)
                .await
                .err(),
            Some(BackendError::AccessDenied(_))
        ));
        assert!(matches!(
            backend
                .get_range(&at("/missing"), AuthMode::Signed, 0..4)
                .await
                .err(),
            Some(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bearer_token_only_when_signed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.bin"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;

        let backend = backend(Some("secret"));
        for auth in [AuthMode::Signed, AuthMode::Unsigned] {
            backend
                .get_range(&locator(&server), auth, 0..4)
                .await
                .unwrap();
        }

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0]
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok()),
            Some("Bearer secret")
        );
        assert!(requests[1].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_signed_without_token_sends_no_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/data.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4]))
            .mount(&server)
            .await;

        backend(None)
            .head_object(&locator(&server), AuthMode::Signed)
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("authorization").is_none());
    }
}
