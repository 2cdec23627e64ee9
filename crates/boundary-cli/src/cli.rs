//! CLI argument definitions for `boundary`.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `resolve` | Resolve a place name to its administrative boundary |
//! | `health` | Print the service health snapshot |
//! | `config` | Print the effective configuration |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | Partial JSON configuration file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--events` | `false` | Stream lifecycle events to stderr as NDJSON |
//!
//! # Examples
//!
//! ```bash
//! boundary resolve Athens --admin-level 8 --pretty
//! boundary resolve "Île-de-France" --admin-level 4 --timeout-ms 2000
//! boundary --config boundary.json health
//! ```

use std::path::PathBuf;

use boundary_core::{AdminLevels, BoundaryOverrides, BoundingBox, ValidationError};
use clap::{Args, Parser, Subcommand};

/// Administrative boundary resolution over OSM Overpass and Nominatim.
#[derive(Debug, Parser)]
#[command(
    name = "boundary",
    author,
    version,
    about = "Resolve place names to administrative boundary polygons",
    long_about = "Resolves a place name to an administrative boundary polygon using a \
priority-ordered provider chain (OSM Overpass, then Nominatim by default) with caching, \
retry with backoff and per-provider circuit breaking.\n\
\n\
Provider API keys are read from BOUNDARY_<PROVIDER_ID>_API_KEY. Logging is controlled \
with RUST_LOG and written to stderr."
)]
pub struct Cli {
    /// Partial JSON configuration; unset fields keep their defaults.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Write lifecycle events to stderr, one JSON object per line.
    #[arg(long, global = true, default_value_t = false)]
    pub events: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve a place name to a boundary.
    Resolve(ResolveArgs),
    /// Print provider, queue and cache health.
    Health,
    /// Print the effective configuration (API keys omitted).
    Config,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Place name; several words are joined with spaces.
    #[arg(required = true, num_args = 1..)]
    pub query: Vec<String>,

    /// Admin level to accept (repeatable, 1-12). Defaults to the configured set.
    #[arg(long = "admin-level", value_name = "N", value_parser = clap::value_parser!(u8).range(1..=12))]
    pub admin_levels: Vec<u8>,

    /// Per-provider call budget in milliseconds.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Fail instead of serving a stale cached boundary.
    #[arg(long, default_value_t = false)]
    pub no_approximate: bool,

    /// Restrict results to minLon,minLat,maxLon,maxLat.
    #[arg(long, value_name = "BBOX", allow_hyphen_values = true)]
    pub bbox: Option<BoundingBox>,
}

impl ResolveArgs {
    pub fn query(&self) -> String {
        self.query.join(" ")
    }

    pub fn overrides(&self) -> Result<BoundaryOverrides, ValidationError> {
        let mut overrides = BoundaryOverrides::default();
        if !self.admin_levels.is_empty() {
            overrides = overrides.admin_levels(AdminLevels::new(self.admin_levels.iter().copied())?);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            overrides = overrides.timeout_ms(timeout_ms);
        }
        if self.no_approximate {
            overrides = overrides.include_approximate(false);
        }
        if let Some(bbox) = self.bbox {
            overrides = overrides.bbox(bbox);
        }
        Ok(overrides)
    }
}
