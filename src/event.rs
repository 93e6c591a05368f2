//! Perfmon event records.
//!
//! A vendor event file is a JSON array of flat objects. Parsing happens in two steps: serde_json
//! turns the file into a list of [`RawEvent`] maps, then [`PerfmonEvent::from_raw`] validates and
//! repairs each one. [`PerfmonEvent::to_perf_json`] produces the record written to the output.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::topic::topic;

/// One event object as it appears in a perfmon json file.
pub type RawEvent = serde_json::Map<String, Value>;

/// One event as written to a perf json topic file. Keys are kept sorted.
pub type PerfJsonEvent = BTreeMap<String, String>;

// Values that mean "not set" in perfmon files.
const DROP_VALUES: &[&str] = &["0", "0x0", "0x00", "na", "null", "tbd"];

// Keys from older perfmon schemas that must never reach perf json.
const LEGACY_KEYS: &[&str] = &[
    "Internal",
    "ConfigCode",
    "Compat",
    "ArchStdEvent",
    "AggregationMode",
    "PerPkg",
    "ScaleUnit",
];

// Filter kinds with no perf json representation, the filter is removed but the event kept.
const REMOVE_FILTER_START: &[&str] = &[
    "cbofilter",
    "chafilter",
    "pcufilter",
    "qpimask",
    "uboxfilter",
    "fc, chnl",
    "chnl",
    "ctrctrl",
];

// Filter kinds that can't be programmed safely, the whole event is dropped.
const DROP_EVENT_FILTER_START: &[&str] = &["ha_addrmatch", "ha_opcodematch", "irpfilter"];

static OFFCORE_RESPONSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^OFFCORE_RESPONSE:request=(.*):response=(.*)")
        .expect("Invalid offcore response regex pattern")
});

/// Errors that make a perfmon event unusable.
#[derive(Debug, Clone, PartialEq)]
pub enum EventError {
    /// The event has no `EventName`.
    MissingName,
    /// A key from an older, incompatible perfmon schema is present.
    LegacyField { event: String, key: String },
    /// The `UMask` (after `UMaskExt` is applied) isn't a hex number.
    InvalidUMask { event: String, umask: String },
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::MissingName => write!(f, "event is missing an EventName"),
            EventError::LegacyField { event, key } => {
                write!(f, "event {event} has unsupported perfmon key '{key}'")
            }
            EventError::InvalidUMask { event, umask } => {
                write!(f, "event {event} has invalid UMask '{umask}'")
            }
        }
    }
}

impl std::error::Error for EventError {}

/// Parse a hex value with or without a `0x` prefix and render it in its shortest form.
pub(crate) fn normalize_hex(value: &str) -> Option<String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    let parsed = u64::from_str_radix(digits, 16).ok()?;
    Some(format!("0x{parsed:x}"))
}

fn clean_value(raw: &Value) -> Option<String> {
    let text = match raw {
        Value::String(s) => s.clone(),
        Value::Null => return None,
        other => other.to_string(),
    };
    let text = text.trim();
    if text.is_empty() || DROP_VALUES.contains(&text) {
        return None;
    }
    Some(
        text.replace('\u{ae}', "(R)")
            .replace('\u{2122}', "(TM)")
            .replace('\u{feff}', ""),
    )
}

fn get(raw: &RawEvent, key: &str) -> Option<String> {
    raw.get(key).and_then(clean_value)
}

fn fix_name(name: &str) -> String {
    if let Some(rest) = name.strip_prefix("OFFCORE_RESPONSE_0") {
        return format!("OFFCORE_RESPONSE{rest}");
    }
    if let Some(caps) = OFFCORE_RESPONSE_RE.captures(name) {
        return format!("OFFCORE_RESPONSE.{}.{}", &caps[1], &caps[2]);
    }
    name.to_string()
}

fn starts_with_any(value: &str, prefixes: &[&str]) -> bool {
    let lower = value.to_lowercase();
    prefixes.iter().any(|prefix| lower.starts_with(prefix))
}

/// An event loaded from a perfmon json file, after fixups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerfmonEvent {
    pub event_name: String,
    pub any_thread: Option<String>,
    pub counter_mask: Option<String>,
    pub data_la: Option<String>,
    pub deprecated: Option<String>,
    pub edge_detect: Option<String>,
    pub errata: Option<String>,
    pub event_code: Option<String>,
    pub ext_sel: Option<String>,
    pub fc_mask: Option<String>,
    pub filter: Option<String>,
    pub filter_value: Option<String>,
    pub invert: Option<String>,
    pub msr_index: Option<String>,
    pub msr_value: Option<String>,
    pub pebs: Option<String>,
    pub port_mask: Option<String>,
    pub sample_after_value: Option<String>,
    pub umask: Option<String>,
    pub unit: Option<String>,
    pub brief_description: Option<String>,
    pub public_description: Option<String>,
    pub topic: String,
}

impl PerfmonEvent {
    pub fn from_raw(raw: &RawEvent) -> Result<Self, EventError> {
        let event_name = get(raw, "EventName")
            .map(|name| fix_name(&name))
            .ok_or(EventError::MissingName)?;

        if let Some(key) = LEGACY_KEYS.iter().find(|key| raw.contains_key(**key)) {
            return Err(EventError::LegacyField {
                event: event_name,
                key: key.to_string(),
            });
        }

        let mut event = PerfmonEvent {
            any_thread: get(raw, "AnyThread"),
            counter_mask: get(raw, "CounterMask"),
            data_la: get(raw, "Data_LA"),
            deprecated: get(raw, "Deprecated"),
            edge_detect: get(raw, "EdgeDetect"),
            errata: get(raw, "Errata"),
            event_code: get(raw, "EventCode"),
            ext_sel: get(raw, "ExtSel"),
            fc_mask: get(raw, "FCMask"),
            filter: get(raw, "Filter"),
            filter_value: get(raw, "FILTER_VALUE"),
            invert: get(raw, "Invert"),
            msr_index: get(raw, "MSRIndex"),
            msr_value: get(raw, "MSRValue"),
            pebs: get(raw, "PEBS"),
            port_mask: get(raw, "PortMask"),
            sample_after_value: get(raw, "SampleAfterValue"),
            umask: get(raw, "UMask"),
            unit: get(raw, "Unit"),
            event_name,
            ..Default::default()
        };

        if let Some(umask) = event.umask.take() {
            let mut umask = umask.split(',').next().unwrap_or_default().to_string();
            if let Some(umask_ext) = get(raw, "UMaskExt") {
                umask = format!("{umask_ext}{}", umask.get(2..).unwrap_or_default());
            }
            let fixed = normalize_hex(&umask).ok_or_else(|| EventError::InvalidUMask {
                event: event.event_name.clone(),
                umask: umask.clone(),
            })?;
            event.umask = Some(fixed);
        }

        match event.unit.as_deref() {
            Some("NCU") if event.event_name == "UNC_CLOCK.SOCKET" => {
                event.unit = Some("CLOCK".to_string());
            }
            // TODO: translate PCU umasks into occupancy filters instead of dropping them.
            Some("PCU") => event.umask = None,
            _ => {}
        }

        if let Some(Value::String(counter)) = raw.get("Counter") {
            if counter.eq_ignore_ascii_case("fixed") {
                event.event_code = Some("0xff".to_string());
                event.umask = None;
            }
        }

        if let Some(filter) = event.filter.as_deref() {
            if starts_with_any(filter, REMOVE_FILTER_START) {
                event.filter = None;
            } else if filter == "Filter1" {
                event.filter = Some(format!(
                    "config1={}",
                    event.filter_value.as_deref().unwrap_or_default()
                ));
            }
        }

        event.brief_description = get(raw, "BriefDescription").or_else(|| get(raw, "Description"));
        // Sandy Bridge files have this one without any description.
        if event.brief_description.is_none()
            && event.event_name == "OFFCORE_RESPONSE.COREWB.ANY_RESPONSE"
        {
            event.brief_description = Some("COREWB & ANY_RESPONSE".to_string());
        }

        event.public_description =
            get(raw, "PublicDescription").or_else(|| get(raw, "Description"));
        // The public description is the longer one, if the brief one already contains it then
        // it adds nothing.
        if let (Some(public), Some(brief)) = (&event.public_description, &event.brief_description) {
            if brief.contains(public.as_str()) {
                event.public_description = None;
            }
        }

        event.topic = topic(&event.event_name, event.unit.as_deref()).to_string();

        if event.brief_description.is_none() && event.public_description.is_none() {
            tracing::warn!(
                "Event {} in {} lacks any description",
                event.event_name,
                event.topic
            );
        }
        tracing::trace!("Read perfmon event: {}", event);

        Ok(event)
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecated.as_deref() == Some("1")
    }

    /// Build the perf json form of this event, or `None` if the event must be dropped.
    pub fn to_perf_json(&self) -> Option<PerfJsonEvent> {
        if let Some(filter) = self.filter.as_deref() {
            if starts_with_any(filter, DROP_EVENT_FILTER_START) {
                return None;
            }
        }

        let mut result = PerfJsonEvent::new();
        result.insert("EventName".to_string(), self.event_name.clone());
        for (key, value) in self.perf_json_fields() {
            if let Some(value) = value {
                result.insert(key.to_string(), value.clone());
            }
        }
        Some(result)
    }

    fn perf_json_fields(&self) -> [(&'static str, &Option<String>); 19] {
        [
            ("AnyThread", &self.any_thread),
            ("BriefDescription", &self.brief_description),
            ("CounterMask", &self.counter_mask),
            ("Data_LA", &self.data_la),
            ("Deprecated", &self.deprecated),
            ("EdgeDetect", &self.edge_detect),
            ("Errata", &self.errata),
            ("EventCode", &self.event_code),
            ("FCMask", &self.fc_mask),
            ("Filter", &self.filter),
            ("Invert", &self.invert),
            ("MSRIndex", &self.msr_index),
            ("MSRValue", &self.msr_value),
            ("PEBS", &self.pebs),
            ("PortMask", &self.port_mask),
            ("PublicDescription", &self.public_description),
            ("SampleAfterValue", &self.sample_after_value),
            ("UMask", &self.umask),
            ("Unit", &self.unit),
        ]
    }
}

impl fmt::Display for PerfmonEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event_name: {}", self.event_name)?;
        let extra = [
            ("ext_sel", &self.ext_sel),
            ("filter_value", &self.filter_value),
        ];
        for (key, value) in self.perf_json_fields().into_iter().chain(extra) {
            if let Some(value) = value {
                write!(f, ", {key}: {value}")?;
            }
        }
        write!(f, ", topic: {}", self.topic)
    }
}
