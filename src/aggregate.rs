//! Per-architecture event aggregation.
//!
//! [`ArchEvents`] owns everything built for one architecture: the normalized events, the perf
//! json records generated from them and the topic each record is written under. Records live in
//! a single arena so that the topic grouping and the name lookup point at the same entry, which
//! is what the uncore overrides rewrite.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result};

use crate::event::{PerfJsonEvent, PerfmonEvent, RawEvent};
use crate::output::to_perf_json_string;

/// File name a topic is written to, e.g. `Virtual Memory` -> `virtual-memory.json`.
pub fn topic_file_name(topic: &str) -> String {
    format!("{}.json", topic.to_lowercase().replace(' ', "-"))
}

#[derive(Debug, Default)]
pub struct ArchEvents {
    // Normalized events by name. Never modified once added.
    pub(crate) events: HashMap<String, PerfmonEvent>,
    // Every perf json record, in the order it was added.
    pub(crate) records: Vec<PerfJsonEvent>,
    // Name to the latest record with that name. Rewritten by the uncore csv.
    pub(crate) by_name: HashMap<String, usize>,
    // Topic to the records written in its file.
    pub(crate) topics: BTreeMap<String, Vec<usize>>,
    // Names of the records created by uncore csv renames.
    pub(crate) clones: HashSet<String>,
}

impl ArchEvents {
    /// Normalize and add the events of one perfmon file.
    ///
    /// `unit` tags every event that doesn't name its own PMU, `per_pkg` marks the events as
    /// package wide. Duplicated names within the file keep the first event.
    pub fn add_events(
        &mut self,
        location: &str,
        raw_events: &[RawEvent],
        unit: Option<&str>,
        per_pkg: bool,
    ) -> Result<()> {
        let events = raw_events
            .iter()
            .map(PerfmonEvent::from_raw)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Invalid perfmon event in {location}"))?;

        let mut seen: HashSet<String> = HashSet::new();
        for event in events {
            let Some(mut record) = event.to_perf_json() else {
                tracing::trace!("Dropping {} with unsupported filter", event.event_name);
                continue;
            };

            if seen.contains(&event.event_name) {
                tracing::warn!(
                    "Dropping duplicated {} in {}\nExisting: {}\nDuplicate: {}",
                    event.event_name,
                    location,
                    self.events
                        .get(&event.event_name)
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                    event
                );
                continue;
            }
            seen.insert(event.event_name.clone());

            if let Some(unit) = unit {
                record
                    .entry("Unit".to_string())
                    .or_insert_with(|| unit.to_string());
            }
            if per_pkg {
                record.insert("PerPkg".to_string(), "1".to_string());
            }

            let idx = self.records.len();
            self.records.push(record);
            self.topics.entry(event.topic.clone()).or_default().push(idx);
            self.by_name.insert(event.event_name.clone(), idx);
            self.events.insert(event.event_name.clone(), event);
        }
        Ok(())
    }

    /// Add the renamed copy `name` of an event under `topic`.
    ///
    /// Only an earlier copy with the same name is replaced in place. A vendor event that already
    /// has the name keeps its record and the copy is added next to it.
    pub(crate) fn upsert_clone(&mut self, topic: &str, name: &str, record: PerfJsonEvent) -> usize {
        if self.clones.contains(name) {
            if let Some(&idx) = self.by_name.get(name) {
                self.records[idx] = record;
                return idx;
            }
        }
        let idx = self.records.len();
        self.records.push(record);
        self.topics.entry(topic.to_string()).or_default().push(idx);
        self.by_name.insert(name.to_string(), idx);
        self.clones.insert(name.to_string());
        idx
    }

    pub fn record(&self, name: &str) -> Option<&PerfJsonEvent> {
        self.by_name.get(name).map(|&idx| &self.records[idx])
    }

    /// Topics that have at least one record, in name order.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(topic, _)| topic.as_str())
    }

    /// The records of `topic`, sorted by event name.
    pub fn topic_records(&self, topic: &str) -> Vec<&PerfJsonEvent> {
        let mut records: Vec<&PerfJsonEvent> = self
            .topics
            .get(topic)
            .map(|indices| indices.iter().map(|&idx| &self.records[idx]).collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.get("EventName").cmp(&b.get("EventName")));
        records
    }

    /// Render every non-empty topic as `(file name, contents)`.
    pub fn topic_files(&self) -> Result<Vec<(String, String)>> {
        self.topics()
            .map(|topic| {
                let contents = to_perf_json_string(&self.topic_records(topic))?;
                Ok((topic_file_name(topic), contents))
            })
            .collect()
    }
}
