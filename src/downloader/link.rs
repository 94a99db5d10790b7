// 链接对象解析
//
// 内容为 `#S3LINK#<url>` 的小对象指向另一个对象，下载前沿链接找到最终对象

use crate::error::{DownloadError, Result};
use crate::objstore::{AuthMode, ObjectBackend, ObjectLocator};
use futures::TryStreamExt;
use tracing::{debug, info};

/// 链接对象内容前缀
pub const LINK_SENTINEL: &str = "#S3LINK#";

/// 超过这个大小的对象不可能是链接
const MAX_LINK_OBJECT_SIZE: u64 = 1024;

/// 沿链接找到最终对象
///
/// 最多检查 `max_depth` 个对象（即最多 `max_depth - 1` 层跳转），超出时返回
/// `LinkResolution`。版本号只作用于最终对象
pub async fn resolve_link(
    backend: &dyn ObjectBackend,
    locator: &ObjectLocator,
    auth: AuthMode,
    max_depth: u32,
) -> Result<ObjectLocator> {
    let version_id = locator.version_id.clone();
    let mut current = locator.clone().with_version(None);
    let mut examined = 0;

    loop {
        if examined >= max_depth {
            return Err(DownloadError::LinkResolution(format!(
                "链接层数超过上限 {}: {}",
                max_depth, locator
            )));
        }
        examined += 1;

        match read_link(backend, &current, auth).await? {
            Some(target) => {
                debug!("链接 #{}: {} -> {}", examined, current, target);
                current = target;
            }
            None => break,
        }
    }

    if examined > 1 {
        info!("链接解析完成: {} -> {} ({} 层)", locator, current, examined - 1);
    }
    Ok(current.with_version(version_id))
}

/// 读取链接目标，不是链接对象时返回 `None`
async fn read_link(
    backend: &dyn ObjectBackend,
    locator: &ObjectLocator,
    auth: AuthMode,
) -> Result<Option<ObjectLocator>> {
    let size = backend.head_object(locator, auth).await?;
    if size == 0 || size > MAX_LINK_OBJECT_SIZE {
        return Ok(None);
    }

    let content: Vec<u8> = backend
        .get_range(locator, auth, 0..size)
        .await?
        .map_ok(|bytes| bytes.to_vec())
        .try_concat()
        .await?;

    let Ok(text) = std::str::from_utf8(&content) else {
        return Ok(None);
    };

    match text.trim().strip_prefix(LINK_SENTINEL) {
        Some(target) => locator.resolve_link_target(target).map(Some),
        None => Ok(None),
    }
}
