use std::path::PathBuf;

/// Configuration for a conversion run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Verbosity of the log output, 0 only reports errors.
    pub verbosity: u8,
    /// Directory the perf json tree is written to.
    pub output_dir: PathBuf,
    /// Root of the perfmon checkout, a path or `file://` url that `mapfile.csv` lives in.
    pub base_path: String,
}

impl Config {
    /// Log level filter for `verbosity`, used when `RUST_LOG` isn't set.
    pub fn log_level(&self) -> &'static str {
        match self.verbosity {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbosity: 0,
            output_dir: PathBuf::from("perf"),
            base_path: "..".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.output_dir, PathBuf::from("perf"));
        assert_eq!(config.base_path, "..");
        assert_eq!(config.log_level(), "error");
    }

    #[test]
    fn test_log_level() {
        let levels: Vec<&str> = (0..5)
            .map(|verbosity| {
                Config {
                    verbosity,
                    ..Default::default()
                }
                .log_level()
            })
            .collect();
        assert_eq!(levels, ["error", "info", "debug", "trace", "trace"]);
    }
}
