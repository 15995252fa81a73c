//! CLI entry point for the grab tool.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use grab_core::download::RateLimiter;
use grab_core::{
    ByteRateLimiter, Client, HashAlgorithm, Request, directory_destination, hash_file,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;
mod progress;

use cli::{Args, Command};

/// Highest value a process exit code can carry.
const MAX_EXIT_CODE: usize = 255;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let code = match args.command {
        Command::Download {
            concurrency,
            limit,
            output,
            urls,
        } => {
            let verbose = args.verbose > 0 && !args.quiet;
            run_download(&urls, &output, concurrency, limit, verbose).await
        }
        Command::Hash { file, algorithm } => run_hash(&file, &algorithm).await,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Downloads `urls` into `output` and returns the number of failures.
///
/// Per-file results are printed only when `verbose` is set.
async fn run_download(
    urls: &[String],
    output: &Path,
    concurrency: usize,
    limit: Option<u64>,
    verbose: bool,
) -> i32 {
    let limiter: Option<Arc<dyn RateLimiter>> = limit.map(|bps| {
        debug!(bytes_per_second = bps, "rate limiting enabled");
        Arc::new(ByteRateLimiter::new(bps)) as Arc<dyn RateLimiter>
    });
    let ui = progress::spawn_progress_ui(verbose);
    let hook = ui.hook();

    let mut failures = 0usize;
    let mut requests = Vec::with_capacity(urls.len());
    for url in urls {
        match Request::new(directory_destination(output), url) {
            Ok(mut request) => {
                request.rate_limiter.clone_from(&limiter);
                request.before_copy.clone_from(&hook);
                requests.push(request);
            }
            Err(e) => {
                warn!(%url, error = %e, "skipping invalid url");
                if verbose {
                    eprintln!("Failed: {url} ({e})");
                }
                failures += 1;
            }
        }
    }

    let total = requests.len();
    info!(urls = total, workers = concurrency, "starting downloads");

    let client = Client::new();
    let cancel = CancellationToken::new();
    let mut responses = client.do_batch(&cancel, concurrency, requests);

    let mut completed = 0usize;
    while let Some(response) = responses.recv().await {
        let outcome = response.wait().await;
        let name = outcome.filename().map_or_else(
            || response.request().url().to_string(),
            |p| p.display().to_string(),
        );
        match outcome.error() {
            None => {
                completed += 1;
                if verbose {
                    println!("Downloaded: {name} (size: {} bytes)", outcome.size());
                }
            }
            Some(e) => {
                failures += 1;
                warn!(file = %name, error = %e, "download failed");
                if verbose {
                    eprintln!("Failed: {name} ({e})");
                }
            }
        }
    }

    ui.finish().await;
    info!(completed, failed = failures, "downloads finished");

    i32::try_from(failures.min(MAX_EXIT_CODE)).unwrap_or(i32::MAX)
}

/// Prints `<hex>  <path>` for `file`; returns the process exit code.
async fn run_hash(file: &Path, algorithm: &str) -> i32 {
    let algorithm: HashAlgorithm = match algorithm.parse() {
        Ok(algorithm) => algorithm,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };

    match hash_file(file, algorithm).await {
        Ok(digest) => {
            println!("{}  {}", hex::encode(digest), file.display());
            0
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}
