//! Retrieval of perfmon input files.
//!
//! Locations are strings built from the base path given on the command line, so they may be
//! `file://` URLs or plain paths. Everything else in the crate only depends on [`Source`].

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;

/// Something that can hand back the contents of a location.
pub trait Source {
    /// Read the full text at `location`. Fails if it doesn't exist.
    fn fetch(&self, location: &str) -> Result<String>;

    /// Best-effort check for optional files.
    fn exists(&self, location: &str) -> bool {
        self.fetch(location).is_ok()
    }

    /// Fetch `location` and parse it as JSON.
    fn fetch_json<T: DeserializeOwned>(&self, location: &str) -> Result<T>
    where
        Self: Sized,
    {
        let buf = self.fetch(location)?;
        serde_json::from_str(&buf).with_context(|| format!("Failed to parse json {location}"))
    }
}

/// Reads locations from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSource;

impl FileSource {
    fn path(location: &str) -> Result<PathBuf> {
        if let Some(path) = location.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        if let Some((scheme, _)) = location.split_once("://") {
            bail!("Unsupported location scheme '{scheme}' in {location}");
        }
        Ok(PathBuf::from(location))
    }
}

impl Source for FileSource {
    fn fetch(&self, location: &str) -> Result<String> {
        let path = Self::path(location)?;
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
    }

    fn exists(&self, location: &str) -> bool {
        Self::path(location)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_urls_and_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mapfile.csv");
        fs::write(&path, "Family-model\n").unwrap();

        let source = FileSource;
        let plain = path.to_str().unwrap();
        let url = format!("file://{plain}");
        assert_eq!(source.fetch(plain).unwrap(), "Family-model\n");
        assert_eq!(source.fetch(&url).unwrap(), "Family-model\n");
        assert!(source.exists(&url));
        assert!(!source.exists(&format!("{url}.missing")));
        assert!(source.fetch(&format!("{url}.missing")).is_err());
    }

    #[test]
    fn test_unsupported_scheme() {
        let source = FileSource;
        assert!(source.fetch("https://example.com/mapfile.csv").is_err());
        assert!(!source.exists("https://example.com/mapfile.csv"));
    }

    #[test]
    fn test_fetch_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        fs::write(&path, r#"[{"EventName": "INST_RETIRED.ANY"}]"#).unwrap();

        let events: Vec<serde_json::Value> =
            FileSource.fetch_json(path.to_str().unwrap()).unwrap();
        assert_eq!(events.len(), 1);

        fs::write(&path, "not json").unwrap();
        let events: Result<Vec<serde_json::Value>> = FileSource.fetch_json(path.to_str().unwrap());
        assert!(events.is_err());
    }
}
