//! Destination filename resolution.
//!
//! Precedence: an explicit file path on the request (handled by the caller),
//! then the `filename` parameter of `Content-Disposition`, then the last path
//! segment of the final URL. Whatever wins is reduced to a bare file name so a
//! server can never steer output outside the destination directory.

use std::path::{Component, Path};

use reqwest::header::{CONTENT_DISPOSITION, HeaderMap};
use url::Url;

use super::error::DownloadError;

/// Resolves the file name for a response served from `url` with `headers`.
///
/// # Errors
///
/// Returns [`DownloadError::NoFilename`] when the winning source yields no
/// usable name (root path, trailing slash, empty disposition filename).
pub(crate) fn resolve_filename(headers: &HeaderMap, url: &Url) -> Result<String, DownloadError> {
    let disposition = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_disposition);

    let candidate = match disposition {
        Some(name) => name,
        None => filename_from_url(url).unwrap_or_default(),
    };

    base_name(&candidate).ok_or_else(|| DownloadError::no_filename(url.as_str()))
}

/// Parses Content-Disposition header to extract filename.
///
/// Handles:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987)
///
/// A quoted empty value (`filename=""`) is returned as `Some("")`; a bare
/// `filename=` with nothing after it is treated as malformed (`None`).
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + 9..].trim();

    if let Some(stripped) = value.strip_prefix('"') {
        let end = stripped.find('"')?;
        return Some(stripped[..end].to_string());
    }

    let end = value.find(';').unwrap_or(value.len());
    let filename = value[..end].trim();
    (!filename.is_empty()).then(|| filename.to_string())
}

/// Last non-empty path segment of `url`, percent-decoded. Query and fragment are ignored.
fn filename_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    Some(decoded)
}

/// Strips directory components and rejects names that are empty or dot segments.
fn base_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if last.is_empty() || !is_safe_filename_segment(last) {
        return None;
    }
    Some(sanitize_filename(last))
}

/// Replaces characters that are invalid on common filesystems: `: * ? " < > |`
/// and control characters.
pub(crate) fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
