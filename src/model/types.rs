//! Normalized entity structs shared by the detectors, scoring and sessions.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use super::timestamp::Timestamp;

/// One recorded test on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    #[serde(rename = "Event_ID")]
    pub event_id: u64,
    #[serde(rename = "Timestamp", with = "crate::bucketing::wall_clock")]
    pub timestamp: Timestamp,
    #[serde(rename = "Operator_ID")]
    pub operator_id: String,
    #[serde(rename = "Device_ID")]
    pub device_id: String,
    #[serde(rename = "Barcode")]
    pub barcode: Option<String>,
    #[serde(rename = "Location")]
    pub location: Option<String>,
    #[serde(rename = "Test_Type")]
    pub test_type: Option<String>,
    /// Row number in the source table (1-based, header lines included).
    #[serde(skip)]
    pub row: usize,
}

/// Suspicious patterns a detector can attach to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flag {
    Rapid,
    LocConflict,
    SharedKey,
    DeviceHop,
    HourlyOutlier,
    ShiftDeviation,
    ShiftViolation,
    LoadDeviation,
    CoLocation,
    WardMismatch,
}

impl Flag {
    pub const COUNT: usize = 10;

    pub const ALL: [Flag; Flag::COUNT] = [
        Flag::Rapid,
        Flag::LocConflict,
        Flag::SharedKey,
        Flag::DeviceHop,
        Flag::HourlyOutlier,
        Flag::ShiftDeviation,
        Flag::ShiftViolation,
        Flag::LoadDeviation,
        Flag::CoLocation,
        Flag::WardMismatch,
    ];

    /// Column name used in the flagged event and operator score tables.
    pub fn column(self) -> &'static str {
        match self {
            Self::Rapid => "RAPID",
            Self::LocConflict => "LOC_CONFLICT",
            Self::SharedKey => "SHARED_KEY",
            Self::DeviceHop => "DEVICE_HOP",
            Self::HourlyOutlier => "HOURLY_OUTLIER",
            Self::ShiftDeviation => "SHIFT_DEVIATION",
            Self::ShiftViolation => "SHIFT_VIOLATION",
            Self::LoadDeviation => "LOAD_DEVIATION",
            Self::CoLocation => "CO_LOCATION",
            Self::WardMismatch => "WARD_MISMATCH",
        }
    }

    /// Parse a column name (case-insensitive).
    pub fn from_column(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|flag| flag.column().eq_ignore_ascii_case(name.trim()))
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column())
    }
}

/// The boolean flag columns attached to one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FlagSet(u16);

impl FlagSet {
    pub fn set(&mut self, flag: Flag, value: bool) {
        if value {
            self.0 |= flag.bit();
        } else {
            self.0 &= !flag.bit();
        }
    }

    pub fn get(&self, flag: Flag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// True iff any flag is raised.
    pub fn any(&self) -> bool {
        self.0 != 0
    }

    pub fn raised(&self) -> impl Iterator<Item = Flag> + '_ {
        Flag::ALL.into_iter().filter(|flag| self.get(*flag))
    }
}

impl Serialize for FlagSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Flag::COUNT))?;
        for flag in Flag::ALL {
            map.serialize_entry(flag.column(), &self.get(flag))?;
        }
        map.end()
    }
}

/// Per-flag true counts for one operator (or device).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagCounts([usize; Flag::COUNT]);

impl FlagCounts {
    pub fn record(&mut self, flags: &FlagSet) {
        for flag in flags.raised() {
            self.0[flag as usize] += 1;
        }
    }

    pub fn get(&self, flag: Flag) -> usize {
        self.0[flag as usize]
    }

    /// Number of flag types with at least one hit.
    pub fn types_hit(&self) -> usize {
        self.0.iter().filter(|count| **count > 0).count()
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

impl Serialize for FlagCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Flag::COUNT))?;
        for flag in Flag::ALL {
            map.serialize_entry(flag.column(), &self.get(flag))?;
        }
        map.end()
    }
}

/// Coarse review tier derived from a suspicion score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
        }
    }
}

/// A row of the flagged event table: the event, its built-in flag columns
/// and the labels custom rules attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlaggedEvent {
    pub event: Event,
    pub flags: FlagSet,
    /// Distinct rule labels, in the order rules emitted them.
    pub rules: Vec<String>,
}

impl FlaggedEvent {
    /// True iff a detector or a rule flagged the event.
    pub fn is_flagged(&self) -> bool {
        self.flags.any() || !self.rules.is_empty()
    }
}

impl Serialize for FlaggedEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Row<'a> {
            #[serde(flatten)]
            event: &'a Event,
            #[serde(flatten)]
            flags: &'a FlagSet,
            #[serde(rename = "Rules")]
            rules: &'a [String],
            #[serde(rename = "Flagged")]
            flagged: bool,
        }

        Row {
            event: &self.event,
            flags: &self.flags,
            rules: &self.rules,
            flagged: self.is_flagged(),
        }
        .serialize(serializer)
    }
}

/// A labelled finding, either derived from a built-in flag or emitted by a
/// custom rule. One event may appear several times with different labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlaggedRecord {
    #[serde(rename = "Event_ID")]
    pub event_id: u64,
    #[serde(rename = "Flag")]
    pub label: String,
    #[serde(rename = "Detail", skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FlaggedRecord {
    pub fn new(event_id: u64, label: impl Into<String>) -> Self {
        Self {
            event_id,
            label: label.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Aggregated suspicion for one operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorScore {
    #[serde(rename = "Operator_ID")]
    pub operator_id: String,
    #[serde(flatten)]
    pub counts: FlagCounts,
    /// Events at least one custom rule flagged.
    #[serde(rename = "Rule_Flags")]
    pub rule_flags: usize,
    #[serde(rename = "Flagged_Events")]
    pub flagged_events: usize,
    #[serde(rename = "Total_Tests")]
    pub total_tests: usize,
    #[serde(rename = "Suspicion_Score")]
    pub suspicion_score: f64,
    #[serde(rename = "Risk_Level")]
    pub risk_level: RiskLevel,
}

/// A cluster of events sharing a key inside one fixed time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    #[serde(rename = "Session_ID")]
    pub session_id: String,
    #[serde(rename = "Start", with = "crate::bucketing::wall_clock")]
    pub start: Timestamp,
    #[serde(rename = "End", with = "crate::bucketing::wall_clock")]
    pub end: Timestamp,
    #[serde(rename = "Event_Count")]
    pub event_count: usize,
    #[serde(rename = "Distinct_Operators")]
    pub distinct_operators: usize,
    #[serde(rename = "Representative_Key")]
    pub representative_key: String,
    #[serde(rename = "Flagged_Events")]
    pub flagged_events: usize,
    #[serde(rename = "Event_IDs")]
    pub event_ids: Vec<u64>,
}
