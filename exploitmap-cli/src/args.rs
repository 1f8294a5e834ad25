use std::path::PathBuf;

use clap::Parser;

/// exploitmap: run matching exploit modules against scan findings
#[derive(Parser, Debug)]
#[command(
    name = "exploitmap",
    version,
    about = "Turn vulnerability scan findings into exploit attempts through Metasploit RPC"
)]
pub struct Args {
    /// Scan document to read findings from (RustMap JSON or nmap XML)
    #[arg(value_name = "SCAN")]
    pub scan: PathBuf,

    /// Settings file (TOML). Defaults to ./exploitmap.toml when present.
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Where to write the JSON report
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Maximum exploit attempts running at once
    #[arg(long = "max-workers", value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_workers: Option<u64>,

    /// Per-attempt timeout in seconds
    #[arg(long = "timeout", value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Extra attempts after a failure or error
    #[arg(long = "retries", value_name = "N")]
    pub retries: Option<u32>,

    /// Match findings and print the planned attempts without executing anything
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Increase verbosity level (use -v or -vv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}
