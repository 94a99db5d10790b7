// 按协议分发到具体后端

use crate::config::AppConfig;
use crate::error::BackendError;
use crate::objstore::{
    AuthMode, ByteStream, HttpBackend, ObjectBackend, ObjectLocator, S3Backend, StorageScheme,
};
use anyhow::Result;
use async_trait::async_trait;
use std::ops::Range;

/// 后端路由：`s3://` 走 S3，`http(s)://` 走 HTTP
#[derive(Debug)]
pub struct BackendRouter {
    s3: S3Backend,
    http: HttpBackend,
}

impl BackendRouter {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            s3: S3Backend::new(config.s3.clone()),
            http: HttpBackend::new(&config.http)?,
        })
    }

    fn backend(&self, locator: &ObjectLocator) -> &dyn ObjectBackend {
        match locator.scheme {
            StorageScheme::S3 => &self.s3,
            StorageScheme::Http | StorageScheme::Https => &self.http,
        }
    }
}

#[async_trait]
impl ObjectBackend for BackendRouter {
    async fn head_object(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
    ) -> Result<u64, BackendError> {
        self.backend(locator).head_object(locator, auth).await
    }

    async fn get_range(
        &self,
        locator: &ObjectLocator,
        auth: AuthMode,
        range: Range<u64>,
    ) -> Result<ByteStream, BackendError> {
        self.backend(locator).get_range(locator, auth, range).await
    }
}
