//! Directory-targeted batch helpers built on [`Client::do_batch`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::client::Client;
use super::constants::DEFAULT_CONCURRENCY;
use super::error::DownloadError;
use super::request::{Request, directory_destination};
use super::response::Response;

/// Reduced view of a finished download.
#[derive(Debug, Clone)]
pub struct DownloadResponse {
    /// Where the content was written, when known.
    pub filename: Option<PathBuf>,
    /// Terminal error; `None` on success.
    pub err: Option<Arc<DownloadError>>,
}

/// Downloads every URL into `destination` using `workers` concurrent workers.
///
/// `destination` must be an existing directory; it is checked once, before any
/// request starts. Each file name is resolved from the server response.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidDestination`] if `destination` is missing or
/// not a directory, and [`DownloadError::InvalidUrl`] for the first malformed URL.
/// No download is started in either case.
#[instrument(skip(client, cancel, destination, urls), fields(url_count = urls.len()))]
pub async fn get_batch(
    client: &Client,
    cancel: &CancellationToken,
    workers: usize,
    destination: impl AsRef<Path>,
    urls: &[impl AsRef<str>],
) -> Result<mpsc::Receiver<Response>, DownloadError> {
    let destination = destination.as_ref();
    match tokio::fs::metadata(destination).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(DownloadError::invalid_destination(
                destination,
                "not a directory",
            ));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(DownloadError::invalid_destination(
                destination,
                "does not exist",
            ));
        }
        Err(e) => return Err(DownloadError::io(destination, e)),
    }

    let target = directory_destination(destination);
    let requests = urls
        .iter()
        .map(|url| {
            Request::new(&target, url.as_ref()).map(|r| r.with_cancel(cancel.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(dir = %destination.display(), count = requests.len(), "starting directory batch");
    Ok(client.do_batch(cancel, workers, requests))
}

/// Downloads every URL into the current directory with default concurrency.
///
/// # Errors
///
/// Same as [`get_batch`].
pub async fn download_batch(
    client: &Client,
    cancel: &CancellationToken,
    urls: &[impl AsRef<str>],
) -> Result<mpsc::Receiver<DownloadResponse>, DownloadError> {
    download_batch_into(client, cancel, ".", urls).await
}

/// [`download_batch`] with an explicit target directory.
pub(crate) async fn download_batch_into(
    client: &Client,
    cancel: &CancellationToken,
    destination: impl AsRef<Path>,
    urls: &[impl AsRef<str>],
) -> Result<mpsc::Receiver<DownloadResponse>, DownloadError> {
    let mut responses =
        get_batch(client, cancel, DEFAULT_CONCURRENCY, destination, urls).await?;
    let (tx, rx) = mpsc::channel(urls.len().max(1));

    tokio::spawn(async move {
        while let Some(response) = responses.recv().await {
            let outcome = response.wait().await;
            let projected = DownloadResponse {
                filename: outcome.filename().map(Path::to_path_buf),
                err: outcome.error_arc(),
            };
            if tx.send(projected).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::testing::RouteTransport;
    use crate::download::transport::Transport;
    use tempfile::TempDir;

    fn route_client(transport: RouteTransport) -> Client {
        Client::with_transport(Arc::new(transport) as Arc<dyn Transport>)
    }

    #[tokio::test]
    async fn test_get_batch_missing_destination() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = get_batch(
            &route_client(RouteTransport::new()),
            &CancellationToken::new(),
            2,
            &missing,
            &["http://test.local/a.txt"],
        )
        .await
        .unwrap_err();

        assert!(
            matches!(err, DownloadError::InvalidDestination { reason, .. } if reason == "does not exist"),
            "got {err}"
        );
    }

    #[tokio::test]
    async fn test_get_batch_file_destination() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();

        let err = get_batch(
            &route_client(RouteTransport::new()),
            &CancellationToken::new(),
            2,
            &file,
            &["http://test.local/a.txt"],
        )
        .await
        .unwrap_err();

        assert!(
            matches!(err, DownloadError::InvalidDestination { reason, .. } if reason == "not a directory"),
            "got {err}"
        );
    }

    #[tokio::test]
    async fn test_get_batch_invalid_url_starts_nothing() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(RouteTransport::new().route("/a.txt", 200, b"alpha"));
        let client = Client::with_transport(Arc::clone(&transport) as Arc<dyn Transport>);

        let err = get_batch(
            &client,
            &CancellationToken::new(),
            2,
            dir.path(),
            &["http://test.local/a.txt", "not a url"],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_get_batch_empty_urls_closes_channel() {
        let dir = TempDir::new().unwrap();
        let urls: [&str; 0] = [];
        let mut rx = get_batch(
            &route_client(RouteTransport::new()),
            &CancellationToken::new(),
            4,
            dir.path(),
            &urls,
        )
        .await
        .unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_get_batch_writes_into_directory() {
        let dir = TempDir::new().unwrap();
        let client = route_client(
            RouteTransport::new()
                .route("/one.txt", 200, b"first")
                .route("/two.txt", 200, b"second")
                .route("/gone.txt", 404, b"missing"),
        );

        let mut rx = get_batch(
            &client,
            &CancellationToken::new(),
            2,
            dir.path(),
            &[
                "http://test.local/one.txt",
                "http://test.local/two.txt",
                "http://test.local/gone.txt",
            ],
        )
        .await
        .unwrap();

        let mut failures = 0;
        let mut count = 0;
        while let Some(response) = rx.recv().await {
            count += 1;
            let outcome = response.wait().await;
            if let Some(err) = outcome.error() {
                assert_eq!(err.status_code(), Some(404));
                failures += 1;
            }
        }
        assert_eq!(count, 3);
        assert_eq!(failures, 1);
        assert_eq!(std::fs::read(dir.path().join("one.txt")).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.path().join("two.txt")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_get_batch_requests_resolve_names_in_directory() {
        let dir = TempDir::new().unwrap();
        let client = route_client(RouteTransport::new().route("/one.txt", 200, b"first"));

        let mut rx = get_batch(
            &client,
            &CancellationToken::new(),
            1,
            dir.path(),
            &["http://test.local/one.txt"],
        )
        .await
        .unwrap();

        let response = rx.recv().await.unwrap();
        assert!(response.request().is_directory_destination());
        let outcome = response.wait().await;
        assert!(outcome.error().is_none());
        assert_eq!(outcome.filename(), Some(dir.path().join("one.txt").as_path()));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_download_batch_projects_results() {
        let dir = TempDir::new().unwrap();
        let client = route_client(
            RouteTransport::new()
                .route("/a.txt", 200, b"alpha")
                .route("/missing.txt", 404, b"missing"),
        );

        let mut rx = download_batch_into(
            &client,
            &CancellationToken::new(),
            dir.path(),
            &["http://test.local/a.txt", "http://test.local/missing.txt"],
        )
        .await
        .unwrap();

        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        assert_eq!(results.len(), 2);

        let ok: Vec<_> = results.iter().filter(|r| r.err.is_none()).collect();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].filename.as_deref(), Some(dir.path().join("a.txt").as_path()));
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"alpha");

        let failed: Vec<_> = results.iter().filter_map(|r| r.err.as_ref()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status_code(), Some(404));
    }

    #[tokio::test]
    async fn test_download_batch_missing_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = download_batch_into(
            &route_client(RouteTransport::new()),
            &CancellationToken::new(),
            dir.path().join("nope"),
            &["http://test.local/a.txt"],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidDestination { .. }));
    }

    #[tokio::test]
    async fn test_get_batch_scope_cancels_requests() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(RouteTransport::new().route("/a.txt", 200, b"alpha"));
        let client = Client::with_transport(Arc::clone(&transport) as Arc<dyn Transport>);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut rx = get_batch(&client, &cancel, 1, dir.path(), &["http://test.local/a.txt"])
            .await
            .unwrap();
        while let Some(response) = rx.recv().await {
            assert!(response.wait().await.error().is_some_and(DownloadError::is_canceled));
        }
        assert_eq!(transport.calls(), 0);
    }
}
