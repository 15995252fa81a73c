//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use grab_core::DEFAULT_CONCURRENCY;

/// Download files over HTTP(S), resuming partial transfers.
#[derive(Parser, Debug)]
#[command(name = "grab")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v shows progress, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download one or more URLs; exit code is the number of failures
    Download {
        /// Maximum concurrent downloads (0 = one worker per URL)
        #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Throughput limit per download in bytes per second
        #[arg(short = 'l', long, value_parser = clap::value_parser!(u64).range(1..))]
        limit: Option<u64>,

        /// Destination directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// URLs to download
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Print the checksum of a file as `<hex>  <path>`
    Hash {
        /// File to hash
        file: PathBuf,

        /// Hash algorithm: md5, sha1 or sha256
        #[arg(short = 't', long = "type", default_value = "sha256")]
        algorithm: String,
    },
}
