//! The perfmon `mapfile.csv` and the perf mapfile generated from it.
//!
//! The perfmon mapfile has one row per (model identifier, event file) pair:
//!
//! ```text
//! Family-model,Version,Filename,EventType,Core Type,Native Model ID,Core Role Name
//! GenuineIntel-6-55-[01234],V1.28,/SKX/events/skylakex_core.json,core,,,
//! ```
//!
//! Rows are folded into one [`Model`] per architecture short name.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::model::{FileKind, Model};
use crate::source::Source;

const MAPFILE_HEADER: [&str; 7] = [
    "Family-model",
    "Version",
    "Filename",
    "EventType",
    "Core Type",
    "Native Model ID",
    "Core Role Name",
];

static SHORTNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/([^/]*)/.*").expect("Invalid shortname regex pattern"));

/// Errors in the perfmon mapfile that make the generated tables untrustworthy.
#[derive(Debug, Clone, PartialEq)]
pub enum MapfileError {
    /// The header row doesn't match the expected columns.
    BadHeader { got: Vec<String> },
    /// Rows of one architecture disagree on its long name.
    LongNameMismatch {
        shortname: String,
        expected: String,
        got: String,
    },
    /// Rows of one architecture disagree on the event version.
    VersionMismatch {
        shortname: String,
        expected: String,
        got: String,
    },
    /// One architecture has two different files of the same kind.
    ConflictingFiles {
        shortname: String,
        longname: String,
        kind: String,
        existing: String,
        got: String,
    },
    /// A path doesn't look like the special case it is handled as.
    UnexpectedPath { shortname: String, path: String },
}

impl fmt::Display for MapfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapfileError::BadHeader { got } => {
                write!(f, "unexpected mapfile header {got:?}, expected {MAPFILE_HEADER:?}")
            }
            MapfileError::LongNameMismatch {
                shortname,
                expected,
                got,
            } => write!(f, "{shortname}: long name {expected} != {got}"),
            MapfileError::VersionMismatch {
                shortname,
                expected,
                got,
            } => write!(f, "{shortname}: version {expected} != {got}"),
            MapfileError::ConflictingFiles {
                shortname,
                longname,
                kind,
                existing,
                got,
            } => write!(
                f,
                "Expected {shortname}/{longname} to have just 1 {kind} url {existing} \
                 but found {got}"
            ),
            MapfileError::UnexpectedPath { shortname, path } => {
                write!(f, "{shortname}: unexpected path {path}")
            }
        }
    }
}

impl std::error::Error for MapfileError {}

#[derive(Debug, Deserialize)]
struct MapfileRow {
    family_model: String,
    version: String,
    path: String,
    event_type: String,
    _core_type: String,
    _native_model_id: String,
    core_role_name: String,
}

/// Split a perfmon path like `/SKL/events/skylake_core.json` into `("SKL", "skylake")`.
fn path_names(path: &str) -> (String, String) {
    let shortname = SHORTNAME_RE.replace(path, "$1").into_owned();
    let longname_re = Regex::new(&format!(
        r"/{}/events/([^_]*)_.*",
        regex::escape(&shortname)
    ));
    let longname = match longname_re {
        Ok(re) => re.replace(path, "$1").into_owned(),
        Err(_) => path.to_string(),
    };
    (shortname, longname)
}

#[derive(Default)]
struct MapfileBuilder {
    // Short name (like SKL) to long name (like Skylake).
    longnames: BTreeMap<String, String>,
    // Short name to the model identifiers (like GenuineIntel-6-4E) it covers.
    models: BTreeMap<String, BTreeSet<String>>,
    // Short name to the location of each kind of file.
    files: BTreeMap<String, BTreeMap<FileKind, String>>,
    // Short name to the version of its event files.
    versions: BTreeMap<String, String>,
}

impl MapfileBuilder {
    fn add_row(&mut self, base_path: &str, row: MapfileRow) -> Result<(), MapfileError> {
        let (shortname, longname) = path_names(&row.path);
        let url = format!("{base_path}{}", row.path);
        let mut event_type = row.event_type;
        let mut core_role_name = row.core_role_name;

        // GenuineIntel-6-BE only has atom cores but is listed with a "core" rather than a
        // "hybridcore" event type, which would give ADL two core files.
        if shortname == "ADL" && event_type == "core" {
            if !row.path.contains("gracemont") {
                return Err(MapfileError::UnexpectedPath {
                    shortname,
                    path: row.path,
                });
            }
            event_type = "atom".to_string();
            core_role_name = "Atom".to_string();
        }

        if event_type == "hybridcore" {
            event_type = if core_role_name == "Core" {
                "core".to_string()
            } else {
                "atom".to_string()
            };
        }

        // KNL and KNM share files and long names, only the identifiers of KNM are wanted.
        if shortname == "KNM" {
            self.models
                .entry("KNL".to_string())
                .or_default()
                .insert(row.family_model);
            return Ok(());
        }

        match self.longnames.get(&shortname) {
            Some(existing) if *existing != longname => {
                return Err(MapfileError::LongNameMismatch {
                    shortname,
                    expected: existing.clone(),
                    got: longname,
                });
            }
            Some(_) => {}
            None => {
                self.longnames.insert(shortname.clone(), longname.clone());
            }
        }
        match self.versions.get(&shortname) {
            Some(existing) if *existing != row.version => {
                return Err(MapfileError::VersionMismatch {
                    shortname,
                    expected: existing.clone(),
                    got: row.version,
                });
            }
            Some(_) => {}
            None => {
                self.versions.insert(shortname.clone(), row.version);
            }
        }
        self.models
            .entry(shortname.clone())
            .or_default()
            .insert(row.family_model);

        let files = self.files.entry(shortname.clone()).or_default();
        let kind = FileKind::from_label(&event_type);
        match files.get(&kind) {
            Some(existing) if *existing != url => Err(MapfileError::ConflictingFiles {
                shortname,
                longname,
                kind: event_type,
                existing: existing.clone(),
                got: url,
            }),
            Some(_) => Ok(()),
            None => {
                files.insert(kind, url);
                Ok(())
            }
        }
    }

    fn build<S: Source>(mut self, source: &S, base_path: &str) -> Vec<Model> {
        let mut archs = Vec::new();
        for (shortname, longname) in self.longnames.iter() {
            let lower = shortname.to_lowercase();
            let mut files = self.files.remove(shortname).unwrap_or_default();

            let uncore_csv = format!("{base_path}/scripts/config/perf-uncore-events-{lower}.csv");
            if source.exists(&uncore_csv) {
                files.insert(FileKind::UncoreCsv, uncore_csv);
            } else {
                tracing::debug!("No uncore csv for {} at {}", shortname, uncore_csv);
            }

            files.insert(
                FileKind::TmaMetrics,
                format!("{base_path}/TMA_Metrics-full.csv"),
            );
            if files.contains_key(&FileKind::Atom) {
                files.insert(
                    FileKind::ECoreTmaMetrics,
                    format!("{base_path}/E-core_TMA_Metrics.csv"),
                );
            }

            let extra_metrics =
                format!("{base_path}/{shortname}/metrics/perf/{lower}_metric_perf.json");
            if source.exists(&extra_metrics) {
                files.insert(FileKind::ExtraMetrics, extra_metrics);
            } else {
                tracing::debug!("No extra metrics for {} at {}", shortname, extra_metrics);
            }

            archs.push(Model::new(
                shortname,
                longname,
                self.versions.get(shortname).map(String::as_str).unwrap_or_default(),
                self.models.remove(shortname).unwrap_or_default(),
                files,
            ));
        }
        archs.sort_by(|a, b| a.longname.cmp(&b.longname));
        archs
    }
}

/// Every architecture described by a perfmon mapfile, sorted by long name.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapfile {
    pub archs: Vec<Model>,
}

impl Mapfile {
    /// Read `<base_path>/mapfile.csv` and probe for each architecture's optional files.
    pub fn parse<S: Source>(source: &S, base_path: &str) -> Result<Self> {
        let location = format!("{base_path}/mapfile.csv");
        tracing::info!("Opening: {}", location);
        let buf = source.fetch(&location)?;
        let mapfile = Self::parse_str(source, base_path, &buf)
            .with_context(|| format!("Failed to parse {location}"))?;
        tracing::debug!("Parsed models:\n{}", mapfile);
        Ok(mapfile)
    }

    fn parse_str<S: Source>(source: &S, base_path: &str, buf: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(buf.as_bytes());

        let mut builder = MapfileBuilder::default();
        let mut first_row = true;
        for record in reader.records() {
            let mut record = record?;
            while record.len() < MAPFILE_HEADER.len() {
                record.push_field("");
            }
            record.truncate(MAPFILE_HEADER.len());
            tracing::trace!("Read CSV line: {:?}", record);

            if first_row {
                if !record.iter().eq(MAPFILE_HEADER) {
                    return Err(MapfileError::BadHeader {
                        got: record.iter().map(String::from).collect(),
                    }
                    .into());
                }
                first_row = false;
                continue;
            }

            let row: MapfileRow = record.deserialize(None)?;
            builder.add_row(base_path, row)?;
        }

        Ok(Mapfile {
            archs: builder.build(source, base_path),
        })
    }

    /// The contents of the generated perf mapfile.csv.
    pub fn mapfile_text(&self) -> String {
        self.archs
            .iter()
            .map(|model| model.mapfile_line() + "\n")
            .collect()
    }

    /// Generate the perf json tree in `outdir`.
    ///
    /// Every architecture is converted before anything is written, so a bad input file leaves no
    /// partial output behind.
    pub fn to_perf_json<S: Source>(&self, source: &S, outdir: &Path) -> Result<()> {
        let mut outputs = Vec::new();
        for model in self.archs.iter() {
            tracing::info!("Creating event json for {}", model.shortname);
            let files = model
                .aggregate(source)
                .and_then(|arch| arch.topic_files())
                .with_context(|| format!("Failed to generate events for {}", model.shortname))?;
            outputs.push((model, files));
        }

        fs::create_dir_all(outdir)
            .with_context(|| format!("Failed to create {}", outdir.display()))?;
        let mapfile_path = outdir.join("mapfile.csv");
        tracing::info!("Writing mapfile to {}", mapfile_path.display());
        fs::write(&mapfile_path, self.mapfile_text())
            .with_context(|| format!("Failed to write {}", mapfile_path.display()))?;

        for (model, files) in outputs {
            let modeldir = outdir.join(&model.longname);
            fs::create_dir_all(&modeldir)
                .with_context(|| format!("Failed to create {}", modeldir.display()))?;
            for (name, contents) in files {
                let path = modeldir.join(name);
                fs::write(&path, contents)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Mapfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for model in self.archs.iter() {
            write!(f, "{model}")?;
        }
        Ok(())
    }
}
