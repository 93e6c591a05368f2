use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use perfmon_json::{run, Config};

#[derive(Debug, Parser)]
#[command(name = "create-perf-json")]
#[command(about = "Create perf json event tables from Intel perfmon files")]
#[command(version)]
struct Command {
    /// Directory to write the perf json tree to
    #[arg(long, default_value = "perf")]
    outdir: PathBuf,
    /// Path or file:// url of the perfmon checkout
    #[arg(long, default_value = "..")]
    basepath: String,
    /// Increase verbosity, may be repeated
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let opts = Command::parse();
    let config = Config {
        verbosity: opts.verbose,
        output_dir: opts.outdir,
        base_path: opts.basepath,
    };

    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(config.log_level()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    run(&config)
}
