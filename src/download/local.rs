//! Local filesystem helpers: modification times and parent directories.

use std::path::Path;
use std::time::SystemTime;

use reqwest::header::{HeaderMap, LAST_MODIFIED};
use tracing::{debug, warn};

use super::error::DownloadError;

/// Parses the `Last-Modified` header. Missing or malformed values yield `None`.
#[must_use]
pub(crate) fn parse_last_modified(headers: &HeaderMap) -> Option<SystemTime> {
    let value = headers.get(LAST_MODIFIED)?.to_str().ok()?;
    match httpdate::parse_http_date(value) {
        Ok(time) => Some(time),
        Err(_) => {
            debug!(value, "ignoring malformed Last-Modified header");
            None
        }
    }
}

/// Sets the modification time of `path`. Best effort: failures are logged, never returned.
pub(crate) async fn set_modified(path: &Path, modified: SystemTime) {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&owned)
            .and_then(|file| file.set_modified(modified))
    })
    .await;

    match result {
        Ok(Ok(())) => debug!(path = %path.display(), "applied remote modification time"),
        Ok(Err(e)) => warn!(path = %path.display(), error = %e, "failed to set modification time"),
        Err(e) => warn!(path = %path.display(), error = %e, "modification time task failed"),
    }
}

/// Creates every missing parent directory of `path`.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] if a directory cannot be created, including
/// when a regular file already occupies part of the path.
pub(crate) async fn create_parent_dirs(path: &Path) -> Result<(), DownloadError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e)),
        _ => Ok(()),
    }
}
