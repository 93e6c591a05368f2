//! Uncore event rewrites from `perf-uncore-events-<arch>.csv`.
//!
//! Each row names an existing uncore event and optionally gives it a new name, a description, a
//! perf style filter, a scale unit or a metric formula. Rows are applied in file order.
//!
//! Row format:
//!
//! ```text
//! name[:u<umask>],newname,description,filter,scale,formula,comment
//! ```

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::aggregate::ArchEvents;
use crate::event::normalize_hex;

const UNCORE_CSV_COLUMNS: usize = 7;

// Perfmon filter spellings and their perf equivalents, applied in order.
const FILTER_REWRITES: &[(&str, &str)] = &[
    ("State=", ",filter_state="),
    ("Match=", ",filter_opc="),
    (":opc=", ",filter_opc="),
    (":nc=", ",filter_nc="),
    (":tid=", ",filter_tid="),
    (":state=", ",filter_state="),
    (":filter1=", ",config1="),
    ("fc, chnl", ""),
];

static FILTER_UMASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^:u[0-9xa-f]+").expect("Invalid filter umask regex pattern"));

static UNCORE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"UNC_[A-Z]_").expect("Invalid uncore prefix regex pattern"));

/// One row of an uncore csv file. Empty columns mean "leave unchanged".
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct UncoreOverride {
    pub name: String,
    pub new_name: String,
    pub description: String,
    pub filter: String,
    pub scale: String,
    pub formula: String,
    pub comment: String,
}

impl UncoreOverride {
    pub fn parse_csv(buf: &str) -> Result<Vec<UncoreOverride>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(buf.as_bytes());

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let mut record = record.with_context(|| format!("Bad uncore csv row {}", line + 1))?;
            if record.len() > UNCORE_CSV_COLUMNS {
                tracing::warn!(
                    "Ignoring extra columns in uncore csv row {}: {:?}",
                    line + 1,
                    record
                );
                record.truncate(UNCORE_CSV_COLUMNS);
            }
            while record.len() < UNCORE_CSV_COLUMNS {
                record.push_field("");
            }
            rows.push(
                record
                    .deserialize(None)
                    .with_context(|| format!("Bad uncore csv row {}", line + 1))?,
            );
        }
        Ok(rows)
    }

    // Split `NAME:u0x10` into the event name and its umask override.
    fn name_and_umask(&self) -> (&str, Option<String>) {
        match self.name.split_once(':') {
            Some((name, umask)) => {
                let umask = umask.get(1..).unwrap_or_default();
                (name, (!umask.is_empty()).then(|| umask.to_string()))
            }
            None => (self.name.as_str(), None),
        }
    }
}

/// Translate a perfmon style uncore filter into perf terms.
///
/// Returns the filter, if anything is left of it, and the umask carried by a leading `:u<hex>`.
fn translate_filter(filter: &str, filter_value: Option<&str>) -> (Option<String>, Option<String>) {
    let mut filter = if filter == "Filter1" {
        format!("config1={}", filter_value.unwrap_or_default())
    } else {
        filter.to_string()
    };
    for (before, after) in FILTER_REWRITES {
        filter = filter.replace(before, after);
    }

    let mut umask = None;
    if let Some(m) = FILTER_UMASK_RE.find(&filter) {
        let token = m.as_str().to_string();
        umask = normalize_hex(&token[2..]);
        filter = filter.replacen(&token, "", 1);
    }

    let filter = filter.strip_prefix(',').unwrap_or(&filter);
    let filter = filter.strip_suffix(',').unwrap_or(filter);
    ((!filter.is_empty()).then(|| filter.to_string()), umask)
}

/// Build the metric for `formula` on event `name`, as `(MetricName, MetricExpr)`.
///
/// Ratios are reported as percentages, except for latencies.
fn metric(name: &str, formula: &str) -> (String, String) {
    if formula.contains('/') && !name.contains("LATENCY") {
        let formula = formula.replace("X/", &format!("{name}/"));
        let expr = format!("({}) * 100", formula.replace('/', " / "));
        let metric_name = UNCORE_PREFIX_RE.replace_all(name, "").to_lowercase();
        (metric_name, expr)
    } else {
        (name.to_string(), formula.to_string())
    }
}

impl ArchEvents {
    /// Apply the rows of an uncore csv file.
    pub fn apply_uncore_overrides(mut self, overrides: &[UncoreOverride]) -> Self {
        for row in overrides {
            self.apply_uncore_override(row);
        }
        self
    }

    // Find the event a csv row refers to. Missing or deprecated names fall back to the CHA
    // spelling of CBO (_C_) and HA (_H_) events.
    fn resolve_uncore_name(&self, name: &str) -> Option<String> {
        let usable = self
            .events
            .get(name)
            .is_some_and(|event| !event.is_deprecated());
        if !usable {
            let alternate = if name.contains("_C_") {
                Some(name.replace("_C_", "_CHA_"))
            } else if name.contains("_H_") {
                Some(name.replace("_H_", "_CHA_"))
            } else {
                None
            };
            if let Some(alternate) = alternate.filter(|alt| self.events.contains_key(alt)) {
                return Some(alternate);
            }
        }
        self.events.contains_key(name).then(|| name.to_string())
    }

    fn apply_uncore_override(&mut self, row: &UncoreOverride) {
        let (name, mut umask) = row.name_and_umask();
        let Some(source) = self.resolve_uncore_name(name) else {
            tracing::trace!("Skipping uncore csv row for unknown event {}", name);
            return;
        };
        let Some(&source_idx) = self.by_name.get(&source) else {
            return;
        };
        let (topic, filter_value) = match self.events.get(&source) {
            Some(event) => (event.topic.clone(), event.filter_value.clone()),
            None => return,
        };

        let mut name = source.clone();
        let mut idx = source_idx;
        let mut description = row.description.clone();
        if !row.new_name.is_empty() {
            let mut record = self.records[source_idx].clone();
            record.insert("EventName".to_string(), row.new_name.clone());
            idx = self.upsert_clone(&topic, &row.new_name, record);
            if !description.is_empty() {
                description.push_str(&format!(". Derived from {}", source.to_lowercase()));
            }
            name = row.new_name.clone();
        }

        let record = &mut self.records[idx];
        if !description.is_empty() {
            record.insert("BriefDescription".to_string(), description);
        }

        if !row.filter.is_empty() {
            let (filter, filter_umask) = translate_filter(&row.filter, filter_value.as_deref());
            if filter_umask.is_some() {
                umask = filter_umask;
            }
            if let Some(filter) = filter {
                record.insert("Filter".to_string(), filter);
            }
        }

        if let Some(umask) = umask {
            record.insert("UMask".to_string(), umask);
        }

        if !row.scale.is_empty() {
            let scale = if row.scale.contains('(') {
                row.scale.replace(['(', ')'], "")
            } else {
                format!("{}Bytes", row.scale)
            };
            record.insert("ScaleUnit".to_string(), scale);
        }

        if !row.formula.is_empty() {
            if !row.scale.is_empty() {
                tracing::warn!("Warning for {} - scale applies to event and metric", name);
            }
            let (metric_name, expr) = metric(&name, &row.formula);
            record.insert("MetricName".to_string(), metric_name);
            record.insert("MetricExpr".to_string(), expr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawEvent;
    use serde_json::json;

    fn uncore_arch() -> ArchEvents {
        let raw: Vec<RawEvent> = serde_json::from_value(json!([
            {
                "EventName": "UNC_CHA_TOR_INSERTS.IA_MISS",
                "Unit": "CHA",
                "EventCode": "0x35",
                "UMask": "0x21",
                "BriefDescription": "TOR inserts from IA that miss",
            },
            {
                "EventName": "UNC_M_CAS_COUNT.RD",
                "Unit": "iMC",
                "EventCode": "0x04",
                "UMask": "0x03",
                "BriefDescription": "All DRAM read CAS commands",
            },
            {
                "EventName": "UNC_C_LLC_LOOKUP.ANY",
                "Unit": "CBO",
                "EventCode": "0x34",
                "Deprecated": "1",
                "BriefDescription": "Old lookup",
            },
            {
                "EventName": "UNC_CHA_LLC_LOOKUP.ANY",
                "Unit": "CHA",
                "EventCode": "0x34",
                "BriefDescription": "Lookup",
            },
            {
                "EventName": "UNC_Q_RxL_FLITS_G1.DRS",
                "Unit": "QPI LL",
                "EventCode": "0x2",
                "FILTER_VALUE": "0x18",
                "BriefDescription": "Flits",
            },
            {
                "EventName": "UNC_M_RD_LATENCY",
                "Unit": "iMC",
                "EventCode": "0x10",
                "BriefDescription": "Latency",
            },
        ]))
        .unwrap();
        let mut arch = ArchEvents::default();
        arch.add_events("uncore.json", &raw, None, true).unwrap();
        arch
    }

    fn rows(csv: &str) -> Vec<UncoreOverride> {
        UncoreOverride::parse_csv(csv).unwrap()
    }

    #[test]
    fn test_parse_pads_short_rows() {
        let parsed = rows("UNC_M_CAS_COUNT.RD,,Reads\nUNC_X,UNC_X_NEW,,,,,\"\"\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "UNC_M_CAS_COUNT.RD");
        assert_eq!(parsed[0].description, "Reads");
        assert_eq!(parsed[0].formula, "");
        assert_eq!(parsed[1].new_name, "UNC_X_NEW");
        assert_eq!(parsed[1].comment, "");
    }

    #[test]
    fn test_parse_truncates_long_rows() {
        let parsed = rows("A,B,C,D,E,F,G,H\n");
        assert_eq!(parsed[0].comment, "G");
    }

    #[test]
    fn test_rename_clones_record() {
        let arch = uncore_arch().apply_uncore_overrides(&rows(
            "UNC_M_CAS_COUNT.RD,UNC_M_CAS_COUNT.READS,,,,,\"\"\n",
        ));
        let original = arch.record("UNC_M_CAS_COUNT.RD").unwrap().clone();
        let clone = arch.record("UNC_M_CAS_COUNT.READS").unwrap();
        assert_eq!(clone["EventName"], "UNC_M_CAS_COUNT.READS");
        let mut expected = original.clone();
        expected.insert("EventName".to_string(), "UNC_M_CAS_COUNT.READS".to_string());
        assert_eq!(clone, &expected);

        let names: Vec<&str> = arch
            .topic_records("Uncore-Memory")
            .iter()
            .map(|r| r["EventName"].as_str())
            .collect();
        assert_eq!(
            names,
            ["UNC_M_CAS_COUNT.RD", "UNC_M_CAS_COUNT.READS", "UNC_M_RD_LATENCY"]
        );
    }

    #[test]
    fn test_rename_with_description() {
        let arch = uncore_arch().apply_uncore_overrides(&rows(
            "UNC_M_CAS_COUNT.RD,UNC_M_CAS_COUNT.READS,Reads,,64,,\n",
        ));
        let clone = arch.record("UNC_M_CAS_COUNT.READS").unwrap();
        assert_eq!(
            clone["BriefDescription"],
            "Reads. Derived from unc_m_cas_count.rd"
        );
        assert_eq!(clone["ScaleUnit"], "64Bytes");
        let original = arch.record("UNC_M_CAS_COUNT.RD").unwrap();
        assert_eq!(original["BriefDescription"], "All DRAM read CAS commands");
        assert!(!original.contains_key("ScaleUnit"));
    }

    #[test]
    fn test_rename_onto_vendor_event() {
        let csv = rows("UNC_M_CAS_COUNT.RD,UNC_CHA_LLC_LOOKUP.ANY,,,,,\n");
        let arch = uncore_arch().apply_uncore_overrides(&csv);

        let other: Vec<(&str, &str)> = arch
            .topic_records("Uncore-Other")
            .iter()
            .map(|r| (r["EventName"].as_str(), r["EventCode"].as_str()))
            .filter(|(name, _)| *name == "UNC_CHA_LLC_LOOKUP.ANY")
            .collect();
        assert_eq!(other, [("UNC_CHA_LLC_LOOKUP.ANY", "0x34")]);

        let memory: Vec<(&str, &str)> = arch
            .topic_records("Uncore-Memory")
            .iter()
            .map(|r| (r["EventName"].as_str(), r["EventCode"].as_str()))
            .collect();
        assert_eq!(
            memory,
            [
                ("UNC_CHA_LLC_LOOKUP.ANY", "0x04"),
                ("UNC_M_CAS_COUNT.RD", "0x04"),
                ("UNC_M_RD_LATENCY", "0x10"),
            ]
        );
        assert_eq!(arch.record("UNC_CHA_LLC_LOOKUP.ANY").unwrap()["EventCode"], "0x04");

        // A second pass replaces the copy and leaves the vendor event alone.
        let again = arch.apply_uncore_overrides(&csv);
        assert_eq!(again.records.len(), uncore_arch().records.len() + 1);
        assert_eq!(again.topic_records("Uncore-Memory").len(), 3);
    }

    #[test]
    fn test_unknown_event_skipped() {
        let before = uncore_arch();
        let after = uncore_arch().apply_uncore_overrides(&rows("UNC_NOPE,UNC_NEW,Desc,,,,\n"));
        assert_eq!(before.records, after.records);
        assert!(after.record("UNC_NEW").is_none());
    }

    #[test]
    fn test_deprecated_falls_back_to_cha() {
        let arch = uncore_arch()
            .apply_uncore_overrides(&rows("UNC_C_LLC_LOOKUP.ANY,,New lookup,,,,\n"));
        assert_eq!(
            arch.record("UNC_CHA_LLC_LOOKUP.ANY").unwrap()["BriefDescription"],
            "New lookup"
        );
        assert_eq!(
            arch.record("UNC_C_LLC_LOOKUP.ANY").unwrap()["BriefDescription"],
            "Old lookup"
        );
    }

    #[test]
    fn test_missing_falls_back_to_cha() {
        let arch = uncore_arch()
            .apply_uncore_overrides(&rows("UNC_C_TOR_INSERTS.IA_MISS,,Misses,,,,\n"));
        assert_eq!(
            arch.record("UNC_CHA_TOR_INSERTS.IA_MISS").unwrap()["BriefDescription"],
            "Misses"
        );
    }

    #[test]
    fn test_home_agent_falls_back_to_cha() {
        let mut arch = uncore_arch();
        let raw: Vec<RawEvent> = serde_json::from_value(json!([{
            "EventName": "UNC_CHA_REQUESTS.READS",
            "Unit": "CHA",
            "EventCode": "0x50",
            "BriefDescription": "Reads",
        }]))
        .unwrap();
        arch.add_events("uncore_experimental.json", &raw, None, true).unwrap();

        let arch = arch.apply_uncore_overrides(&rows("UNC_H_REQUESTS.READS,,HA reads,,,,\n"));
        assert_eq!(
            arch.record("UNC_CHA_REQUESTS.READS").unwrap()["BriefDescription"],
            "HA reads"
        );
        assert!(arch.record("UNC_H_REQUESTS.READS").is_none());
    }

    #[test]
    fn test_filter_translation() {
        assert_eq!(
            translate_filter(":opc=0x202:nc=1", None),
            (Some("filter_opc=0x202,filter_nc=1".to_string()), None)
        );
        assert_eq!(
            translate_filter(":u0x10:state=0x1", None),
            (Some("filter_state=0x1".to_string()), Some("0x10".to_string()))
        );
        assert_eq!(
            translate_filter("Filter1", Some("0x18")),
            (Some("config1=0x18".to_string()), None)
        );
        assert_eq!(translate_filter("fc, chnl", None), (None, None));
        assert_eq!(
            translate_filter(":u0x3", None),
            (None, Some("0x3".to_string()))
        );
    }

    #[test]
    fn test_filter_and_umask_override() {
        let arch = uncore_arch().apply_uncore_overrides(&rows(
            "UNC_CHA_TOR_INSERTS.IA_MISS,,,:u0x10:opc=0x202,,,\n\
             UNC_M_CAS_COUNT.RD:u0xf,,,,,,\n\
             UNC_Q_RxL_FLITS_G1.DRS,,,Filter1,,,\n",
        ));
        let tor = arch.record("UNC_CHA_TOR_INSERTS.IA_MISS").unwrap();
        assert_eq!(tor["Filter"], "filter_opc=0x202");
        assert_eq!(tor["UMask"], "0x10");
        assert_eq!(arch.record("UNC_M_CAS_COUNT.RD").unwrap()["UMask"], "0xf");
        assert_eq!(
            arch.record("UNC_Q_RxL_FLITS_G1.DRS").unwrap()["Filter"],
            "config1=0x18"
        );
    }

    #[test]
    fn test_scale_with_parentheses() {
        let arch = uncore_arch()
            .apply_uncore_overrides(&rows("UNC_M_CAS_COUNT.RD,,,,(6.103515625E-5MiB),,\n"));
        assert_eq!(
            arch.record("UNC_M_CAS_COUNT.RD").unwrap()["ScaleUnit"],
            "6.103515625E-5MiB"
        );
    }

    #[test]
    fn test_formula_metrics() {
        let arch = uncore_arch().apply_uncore_overrides(&rows(
            "UNC_CHA_TOR_INSERTS.IA_MISS,,,,,X/UNC_CHA_TOR_INSERTS.IA,\n\
             UNC_M_RD_LATENCY,,,,,UNC_M_RD_LATENCY/UNC_M_CAS_COUNT.RD,\n\
             UNC_M_CAS_COUNT.RD,,,,,UNC_M_CAS_COUNT.RD * 64,\n",
        ));
        let tor = arch.record("UNC_CHA_TOR_INSERTS.IA_MISS").unwrap();
        assert_eq!(
            tor["MetricExpr"],
            "(UNC_CHA_TOR_INSERTS.IA_MISS / UNC_CHA_TOR_INSERTS.IA) * 100"
        );
        assert_eq!(tor["MetricName"], "unc_cha_tor_inserts.ia_miss");

        let latency = arch.record("UNC_M_RD_LATENCY").unwrap();
        assert_eq!(latency["MetricName"], "UNC_M_RD_LATENCY");
        assert_eq!(latency["MetricExpr"], "UNC_M_RD_LATENCY/UNC_M_CAS_COUNT.RD");

        let cas = arch.record("UNC_M_CAS_COUNT.RD").unwrap();
        assert_eq!(cas["MetricName"], "UNC_M_CAS_COUNT.RD");
        assert_eq!(cas["MetricExpr"], "UNC_M_CAS_COUNT.RD * 64");
    }

    #[test]
    fn test_metric_name_strips_box_prefix() {
        let (name, expr) = metric("UNC_M_PRE_COUNT.PAGE_MISS", "X/UNC_M_PRE_COUNT.ALL");
        assert_eq!(name, "pre_count.page_miss");
        assert_eq!(
            expr,
            "(UNC_M_PRE_COUNT.PAGE_MISS / UNC_M_PRE_COUNT.ALL) * 100"
        );
    }

    #[test]
    fn test_idempotent() {
        let csv = rows(
            "UNC_M_CAS_COUNT.RD,,Reads,,64,,\n\
             UNC_CHA_TOR_INSERTS.IA_MISS,,,:u0x10:opc=0x202,,X/UNC_CHA_TOR_INSERTS.IA,\n\
             UNC_M_CAS_COUNT.RD,UNC_M_CAS_COUNT.READS,Reads,,,,\n",
        );
        let once = uncore_arch().apply_uncore_overrides(&csv);
        let twice = uncore_arch()
            .apply_uncore_overrides(&csv)
            .apply_uncore_overrides(&csv);
        assert_eq!(once.records, twice.records);
        assert_eq!(once.topics, twice.topics);
    }
}
