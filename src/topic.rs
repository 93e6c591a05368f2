//! Event topic classification.
//!
//! Every event lands in exactly one topic file. Uncore events are bucketed by the PMU that owns
//! them, core events by matching their name against a table of prioritized regular expressions.

use std::sync::LazyLock;

use regex::Regex;

/// Topic used when nothing in the rule table matches.
pub const OTHER_TOPIC: &str = "Other";

// (topic, pattern, priority). If an event name matches the pattern then the topic is its topic
// unless a different topic matches with a higher priority.
const TOPIC_RULES: &[(&str, &str, u32)] = &[
    ("Cache", r".*CACHE.*", 3),
    ("Cache", r"CORE_REJECT_L2Q.*", 1),
    ("Cache", r"DL1.*", 1),
    ("Cache", r"L1D.*", 1),
    ("Cache", r"L1D_.*", 1),
    ("Cache", r"L2.*", 1),
    ("Cache", r"LONGEST_LAT_CACHE.*", 1),
    ("Cache", r"MEM_.+", 3),
    ("Cache", r"MEM_LOAD_UOPS.*", 1),
    ("Cache", r"OCR.*L3_HIT.*", 1),
    ("Cache", r"OFFCORE_REQUESTS.*", 1),
    ("Cache", r"OFFCORE_RESPONSE.*", 1),
    ("Cache", r"REHABQ.*", 1),
    ("Cache", r"SQ_MISC.*", 1),
    ("Cache", r"STORE.*", 1),
    ("Cache", r"SW_PREFETCH_ACCESS.*", 1),
    ("Floating point", r".*AVX.*", 3),
    ("Floating point", r".*FPDIV.*", 3),
    ("Floating point", r".*FP_ASSIST.*", 3),
    ("Floating point", r".*SIMD.*", 3),
    ("Floating point", r"ASSISTS.FP.*", 1),
    ("Floating point", r"FP_.*", 3),
    ("Floating point", r"FP_COMP_OPS_EXE.*", 1),
    ("Floating point", r"SIMD.*", 1),
    ("Floating point", r"SIMD_FP_256.*", 1),
    ("Floating point", r"X87.*", 1),
    ("Frontend", r"BACLEARS.*", 3),
    ("Frontend", r"CYCLES_ICACHE_MEM_STALLED.*", 3),
    ("Frontend", r"DECODE.*", 1),
    ("Frontend", r"DSB.*", 1),
    ("Frontend", r"FRONTEND.*", 3),
    ("Frontend", r"ICACHE.*", 4),
    ("Frontend", r"IDQ.*", 3),
    ("Frontend", r"MACRO_INSTS.*", 1),
    ("Frontend", r"MS_DECODED.*", 1),
    ("Frontend", r"TWO_UOP_INSTS_DECODED.*", 1),
    ("Frontend", r"UOPS.MS_CYCLES.*", 1),
    ("Memory", r".*L3_MISS.*", 2),
    ("Memory", r".*LLC_MISS.*", 2),
    ("Memory", r".*MEMORY_ORDERING.*", 3),
    ("Memory", r"HLE.*", 3),
    ("Memory", r"LD_HEAD.*", 1),
    ("Memory", r"MEMORY_ACTIVITY.*", 1),
    ("Memory", r"MEM_TRANS_RETIRED.*", 3),
    ("Memory", r"MISALIGN_MEM_REF.*", 1),
    ("Memory", r"OFFCORE_RESPONSE.*DDR.*", 1),
    ("Memory", r"OFFCORE_RESPONSE.*DRAM.*", 1),
    ("Memory", r"OFFCORE_RESPONSE.*MCDRAM.*", 1),
    ("Memory", r"PREFETCH.*", 1),
    ("Memory", r"RTM.*", 3),
    ("Memory", r"TX_EXEC.*", 1),
    ("Memory", r"TX_MEM.*", 1),
    ("Pipeline", r".*_DISPATCHED.*", 1),
    ("Pipeline", r".*_ISSUED.*", 1),
    ("Pipeline", r".*_RETIRED.*", 1),
    ("Pipeline", r"AGU_BYPASS_CANCEL.*", 1),
    ("Pipeline", r"ARITH.*", 1),
    ("Pipeline", r"ASSISTS.ANY.*", 1),
    ("Pipeline", r"BACLEAR.*", 1),
    ("Pipeline", r"BOGUS_BR.*", 1),
    ("Pipeline", r"BPU_.*", 1),
    ("Pipeline", r"BR_.*", 1),
    ("Pipeline", r"BTCLEAR.*", 1),
    ("Pipeline", r"CPU_CLK.*", 1),
    ("Pipeline", r"CYCLES_DIV_BUSY.*", 1),
    ("Pipeline", r"CYCLE_ACTIVITY.*", 1),
    ("Pipeline", r"DIV.*", 1),
    ("Pipeline", r"EXE_ACTIVITY.*", 1),
    ("Pipeline", r"IDQ.*", 1),
    ("Pipeline", r"ILD.*", 1),
    ("Pipeline", r"INST_.*", 1),
    ("Pipeline", r"INT_MISC.*", 1),
    ("Pipeline", r"ISSUE_SLOTS_NOT_CONSUMED.*", 1),
    ("Pipeline", r"LD_BLOCKS.*", 1),
    ("Pipeline", r"LOAD_HIT_PRE.*", 1),
    ("Pipeline", r"LSD.*", 1),
    ("Pipeline", r"MACHINE_CLEARS.*", 1),
    ("Pipeline", r"MOVE_ELIMINATION.*", 1),
    ("Pipeline", r"MUL.*", 1),
    ("Pipeline", r"NO_ALLOC_CYCLES.*", 1),
    ("Pipeline", r"OTHER_ASSISTS.*", 1),
    ("Pipeline", r"PARTIAL_RAT_STALLS.*", 1),
    ("Pipeline", r"RAT_STALLS.*", 1),
    ("Pipeline", r"RECYCLEQ.*", 1),
    ("Pipeline", r"REISSUE.*", 1),
    ("Pipeline", r"RESOURCE_STALLS.*", 1),
    ("Pipeline", r"ROB_MISC_EVENTS.*", 1),
    ("Pipeline", r"RS_EVENTS.*", 1),
    ("Pipeline", r"RS_FULL.*", 1),
    ("Pipeline", r"SERIALIZATION.NON_C01_MS_SCB.*", 1),
    ("Pipeline", r"STORE_FORWARD.*", 1),
    ("Pipeline", r"TOPDOWN.*", 1),
    ("Pipeline", r"UOPS_.*", 1),
    ("Pipeline", r"UOP_DISPATCHES_CANCELLED.*", 1),
    ("Pipeline", r"UOP_UNFUSION.*", 1),
    ("Virtual Memory", r".*DTLB.*", 3),
    ("Virtual Memory", r".TLB_.*", 1),
    ("Virtual Memory", r"DATA_TLB.*", 1),
    ("Virtual Memory", r"EPT.*", 1),
    ("Virtual Memory", r"ITLB.*", 3),
    ("Virtual Memory", r"PAGE_WALK.*", 1),
    ("Virtual Memory", r"TLB_FLUSH.*", 1),
];

struct TopicRule {
    pattern: &'static str,
    priority: u32,
    // Anchored at the start only, names match on a prefix.
    regex: Regex,
}

struct TopicRules {
    topic: &'static str,
    rules: Vec<TopicRule>,
}

// Topics in name order, each with its rules sorted highest priority first so the scan can stop
// as soon as a rule can no longer beat the current match.
static TOPICS: LazyLock<Vec<TopicRules>> = LazyLock::new(|| {
    let mut topics: Vec<TopicRules> = Vec::new();
    for &(topic, pattern, priority) in TOPIC_RULES {
        let rule = TopicRule {
            pattern,
            priority,
            regex: Regex::new(&format!("^(?:{pattern})")).expect("Invalid topic regex pattern"),
        };
        match topics.iter_mut().find(|t| t.topic == topic) {
            Some(entry) => entry.rules.push(rule),
            None => topics.push(TopicRules {
                topic,
                rules: vec![rule],
            }),
        }
    }
    topics.sort_by(|a, b| a.topic.cmp(b.topic));
    for entry in topics.iter_mut() {
        entry.rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.pattern.cmp(b.pattern))
        });
        entry.rules.dedup_by(|a, b| a.pattern == b.pattern);
    }
    topics
});

fn unit_topic(unit: &str) -> &'static str {
    match unit {
        "iMC" => "Uncore-Memory",
        "CBO" | "HA" => "Uncore-Cache",
        "PCU" => "Uncore-Power",
        _ if unit.starts_with("QPI") => "Uncore-Interconnect",
        _ => "Uncore-Other",
    }
}

/// Map an event name to its associated topic.
///
/// `event_name` is a name like `UNC_M2M_BYPASS_M2M_Egress.NOT_TAKEN` and `unit` is the PMU
/// responsible for the event, or `None` for CPU events.
///
/// Matches of equal priority in a later topic replace the earlier one. The generated tables
/// have always been produced this way, so the tie rule stays.
pub fn topic(event_name: &str, unit: Option<&str>) -> &'static str {
    if let Some(unit) = unit {
        if !unit.contains("cpu") {
            return unit_topic(unit);
        }
    }

    let mut result = None;
    let mut result_priority = 0;
    for entry in TOPICS.iter() {
        for rule in entry.rules.iter() {
            if result.is_some() && rule.priority < result_priority {
                break;
            }
            if rule.regex.is_match(event_name) {
                result = Some(entry.topic);
                result_priority = rule.priority;
            }
        }
    }

    result.unwrap_or(OTHER_TOPIC)
}
