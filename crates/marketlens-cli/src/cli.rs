//! CLI argument definitions for marketlens.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `orders` | Fetch trade history for a wallet or market |
//! | `activity` | Fetch wallet activity (splits, merges, redeems) |
//! | `wallets` | Fetch every page for several wallets, one after another |
//! | `config` | Print the effective configuration |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | JSON config file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--offline` | `false` | Answer from a scripted transport instead of the network |
//! | `--log-level` | `warn` | Log filter when `RUST_LOG` is unset |
//! | `--min-interval-ms` | config | Override request spacing |
//! | `--timeout-ms` | config | Override the per-attempt timeout |
//!
//! # Examples
//!
//! ```bash
//! marketlens orders --user 0xabc --limit 100 --pretty
//! marketlens activity --user 0xabc --all
//! marketlens wallets 0xabc 0xdef --kind activity
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use marketlens_core::ResourceKind;

#[derive(Debug, Parser)]
#[command(
    name = "marketlens",
    author,
    version,
    about = "Rate-limited prediction-market trade and activity fetcher"
)]
pub struct Cli {
    /// JSON configuration file. `MARKETLENS_*` variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Serve empty pages from a local scripted transport.
    #[arg(long, global = true, default_value_t = false)]
    pub offline: bool,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Upstream base URL.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Minimum gap between one request's completion and the next start.
    #[arg(long, global = true)]
    pub min_interval_ms: Option<u64>,

    /// Per-attempt request timeout in milliseconds.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch trade history.
    ///
    /// # Examples
    ///
    ///   marketlens orders --user 0xabc
    ///   marketlens orders --market-slug btc-updown --limit 50 --offset 100
    Orders(FetchArgs),

    /// Fetch wallet activity.
    Activity(FetchArgs),

    /// Fetch every page for each wallet, strictly one wallet at a time.
    ///
    /// A failure for one wallet is reported alongside the others' records.
    Wallets(WalletsArgs),

    /// Print the effective configuration (file, environment and flags merged).
    Config,
}

/// Filters shared by every fetch command.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Market slug.
    #[arg(long)]
    pub market_slug: Option<String>,

    #[arg(long)]
    pub condition_id: Option<String>,

    #[arg(long)]
    pub token_id: Option<String>,

    /// Range start, RFC 3339 (e.g. 2024-01-01T00:00:00Z) or unix seconds.
    #[arg(long)]
    pub start: Option<String>,

    /// Range end, RFC 3339 or unix seconds.
    #[arg(long)]
    pub end: Option<String>,

    /// Page size (1-1000).
    #[arg(long)]
    pub limit: Option<u32>,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Wallet address.
    #[arg(long)]
    pub user: Option<String>,

    #[command(flatten)]
    pub filters: FilterArgs,

    #[arg(long)]
    pub offset: Option<u64>,

    /// Follow pagination and return every record.
    #[arg(long, default_value_t = false)]
    pub all: bool,

    /// Queue priority; higher runs sooner.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i32,

    /// Skip the cache read and store the fresh result.
    #[arg(long, default_value_t = false)]
    pub refresh: bool,
}

#[derive(Debug, Args)]
pub struct WalletsArgs {
    /// Wallet addresses.
    #[arg(required = true, num_args = 1..)]
    pub users: Vec<String>,

    #[arg(long, value_enum, default_value_t = KindArg::Orders)]
    pub kind: KindArg,

    #[command(flatten)]
    pub filters: FilterArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Orders,
    Activity,
}

impl From<KindArg> for ResourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Orders => Self::Orders,
            KindArg::Activity => Self::Activity,
        }
    }
}
