// 对象存储后端模块

pub mod http;
#[cfg(test)]
pub mod memory;
pub mod router;
pub mod s3;
pub mod types;

pub use http::HttpBackend;
pub use router::BackendRouter;
pub use s3::S3Backend;
pub use types::*;
