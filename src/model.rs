//! One CPU architecture such as Skylake or Alder Lake, and the files describing it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{Context, Result};

use crate::aggregate::ArchEvents;
use crate::event::RawEvent;
use crate::source::Source;
use crate::uncore::UncoreOverride;

/// The kinds of file an architecture can reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    Core,
    Atom,
    Uncore,
    UncoreExperimental,
    UncoreCsv,
    TmaMetrics,
    ECoreTmaMetrics,
    ExtraMetrics,
    /// Any other `EventType` from the mapfile, kept so conflicting paths are still caught.
    Other(String),
}

impl FileKind {
    pub fn from_label(label: &str) -> Self {
        match label {
            "core" => FileKind::Core,
            "atom" => FileKind::Atom,
            "uncore" => FileKind::Uncore,
            "uncore experimental" => FileKind::UncoreExperimental,
            "uncore csv" => FileKind::UncoreCsv,
            "tma metrics" => FileKind::TmaMetrics,
            "e-core tma metrics" => FileKind::ECoreTmaMetrics,
            "extra metrics" => FileKind::ExtraMetrics,
            other => FileKind::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            FileKind::Core => "core",
            FileKind::Atom => "atom",
            FileKind::Uncore => "uncore",
            FileKind::UncoreExperimental => "uncore experimental",
            FileKind::UncoreCsv => "uncore csv",
            FileKind::TmaMetrics => "tma metrics",
            FileKind::ECoreTmaMetrics => "e-core tma metrics",
            FileKind::ExtraMetrics => "extra metrics",
            FileKind::Other(label) => label,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// Event files, in the order their events are read.
const EVENT_FILE_KINDS: [FileKind; 4] = [
    FileKind::Atom,
    FileKind::Core,
    FileKind::Uncore,
    FileKind::UncoreExperimental,
];

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    /// Typically a 3 letter name like SKL.
    pub shortname: String,
    /// Lowercase model name like skylake, also the output directory name.
    pub longname: String,
    /// Version of the event json.
    pub version: String,
    /// Model identifiers like GenuineIntel-6-2E, sorted.
    pub models: BTreeSet<String>,
    /// Location of each kind of file.
    pub files: BTreeMap<FileKind, String>,
}

impl Model {
    pub fn new(
        shortname: &str,
        longname: &str,
        version: &str,
        models: BTreeSet<String>,
        files: BTreeMap<FileKind, String>,
    ) -> Self {
        Model {
            shortname: shortname.to_string(),
            longname: longname.to_lowercase(),
            version: version.to_string(),
            models,
            files,
        }
    }

    /// Hybrid parts have separate core and atom event files and get `cpu_core`/`cpu_atom` units.
    pub fn is_hybrid(&self) -> bool {
        self.files.contains_key(&FileKind::Atom) && self.files.contains_key(&FileKind::Core)
    }

    /// The perf mapfile.csv line for this model.
    ///
    /// Several identifiers are folded into one regex: `GenuineIntel-6-3[CF]` when they differ by
    /// a single character, `GenuineIntel-6-(4E|5E)` otherwise.
    pub fn mapfile_line(&self) -> String {
        let models: Vec<&str> = self.models.iter().map(String::as_str).collect();
        let ret = match models.as_slice() {
            [] => String::new(),
            [model] => model.to_string(),
            [first, rest @ ..] => {
                let mut prefix_len = first.len();
                for model in rest {
                    prefix_len = first
                        .char_indices()
                        .zip(model.chars())
                        .take_while(|((idx, a), b)| *idx < prefix_len && a == b)
                        .map(|((idx, a), _)| idx + a.len_utf8())
                        .last()
                        .unwrap_or(0);
                }
                let prefix = &first[..prefix_len];
                let suffixes: Vec<&str> = models.iter().map(|model| &model[prefix_len..]).collect();
                if suffixes.iter().all(|suffix| suffix.chars().count() == 1) {
                    format!("{prefix}[{}]", suffixes.concat())
                } else {
                    format!("{prefix}({})", suffixes.join("|"))
                }
            }
        };
        format!("{ret},{},{},core", self.version.to_lowercase(), self.longname)
    }

    /// Read every event file of this model and apply the uncore csv, if any.
    pub fn aggregate<S: Source>(&self, source: &S) -> Result<ArchEvents> {
        let mut arch = ArchEvents::default();
        for kind in EVENT_FILE_KINDS.iter() {
            let Some(location) = self.files.get(kind) else {
                continue;
            };
            tracing::debug!("Generating {} events from {}", kind, location);
            let raw_events: Vec<RawEvent> = source
                .fetch_json(location)
                .with_context(|| format!("Failed to load {} events for {}", kind, self.shortname))?;

            let unit = match kind {
                FileKind::Atom if self.is_hybrid() => Some("cpu_atom"),
                FileKind::Core if self.is_hybrid() => Some("cpu_core"),
                _ => None,
            };
            let per_pkg = matches!(kind, FileKind::Uncore | FileKind::UncoreExperimental);
            arch.add_events(location, &raw_events, unit, per_pkg)?;
        }

        if let Some(location) = self.files.get(&FileKind::UncoreCsv) {
            tracing::debug!("Rewriting events with {}", location);
            let overrides = UncoreOverride::parse_csv(&source.fetch(location)?)
                .with_context(|| format!("Failed to parse {location}"))?;
            arch = arch.apply_uncore_overrides(&overrides);
        }
        Ok(arch)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} / {}", self.shortname, self.longname)?;
        writeln!(f, "\tmodels={:?}", self.models)?;
        writeln!(f, "\tfiles:")?;
        for (kind, location) in self.files.iter() {
            writeln!(f, "\t\t{kind} = {location}")?;
        }
        Ok(())
    }
}
