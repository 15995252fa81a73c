//! Default User-Agent string for download requests.

/// Project URL advertised in the User-Agent (RFC 9308 good citizenship).
const PROJECT_UA_URL: &str = "https://github.com/grab-rs/grab";

/// Default User-Agent for download requests: `grab/<version> (+<url>)`.
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("grab/{version} (+{PROJECT_UA_URL})")
}
