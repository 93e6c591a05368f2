//! perfmon-json - convert Intel perfmon event descriptions into perf json event tables.
//!
//! The perfmon repository describes each CPU model's performance monitoring events in json files
//! listed by a `mapfile.csv`. The Linux perf tool wants one directory per architecture with the
//! events split into topic files, plus its own `mapfile.csv` matching CPU identifiers to those
//! directories.
//!
//! # Modules
//!
//! - [`mapfile`] - Reading the perfmon mapfile and writing the generated tree
//! - [`model`] - One architecture and the files describing it
//! - [`event`] - Normalizing a single perfmon event
//! - [`topic`] - Assigning events to topic files
//! - [`uncore`] - Uncore renames and rewrites from the perf-uncore-events csv
//! - [`aggregate`] - Per-architecture event collection
//! - [`output`] - perf json rendering
//! - [`source`] - Loading input files
//!
//! # Example
//!
//! ```no_run
//! use perfmon_json::Config;
//!
//! let config = Config {
//!     base_path: "/src/perfmon".to_string(),
//!     ..Default::default()
//! };
//! perfmon_json::run(&config).expect("Failed to generate perf json");
//! ```

pub mod aggregate;
pub mod config;
pub mod event;
pub mod mapfile;
pub mod model;
pub mod output;
pub mod source;
pub mod topic;
pub mod uncore;

use anyhow::Result;

pub use aggregate::ArchEvents;
pub use config::Config;
pub use event::{EventError, PerfJsonEvent, PerfmonEvent};
pub use mapfile::{Mapfile, MapfileError};
pub use model::{FileKind, Model};
pub use source::{FileSource, Source};

/// Convert the perfmon tree at `config.base_path` into perf json under `config.output_dir`.
pub fn run(config: &Config) -> Result<()> {
    let source = FileSource;
    let mapfile = Mapfile::parse(&source, &config.base_path)?;
    mapfile.to_perf_json(&source, &config.output_dir)
}
