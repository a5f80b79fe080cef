//! Event log construction and grouping.
//!
//! The log is an arena of [`Event`]s in input order. Detectors never reorder
//! it; they ask for [`Partition`]s, which hold arena indices sorted by
//! `(timestamp, event_id)`.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use super::timestamp::parse_timestamp;
use super::types::Event;
use crate::error::{EngineError, EngineResult, MAX_TIMESTAMP_SAMPLES};

/// Canonical input columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Timestamp,
    OperatorId,
    DeviceId,
    Barcode,
    Location,
    TestType,
    EventId,
}

impl Column {
    pub const REQUIRED: [Column; 3] = [Column::Timestamp, Column::OperatorId, Column::DeviceId];

    pub fn name(self) -> &'static str {
        match self {
            Self::Timestamp => "Timestamp",
            Self::OperatorId => "Operator_ID",
            Self::DeviceId => "Device_ID",
            Self::Barcode => "Barcode",
            Self::Location => "Location",
            Self::TestType => "Test_Type",
            Self::EventId => "Event_ID",
        }
    }

    /// Resolve a header cell, accepting case, spacing and the aliases used by
    /// older exports ("Operator ID", "Device", "Test Type").
    pub fn resolve(header: &str) -> Option<Self> {
        let normalized: String = header
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        match normalized.as_str() {
            "timestamp" | "time" | "datetime" => Some(Self::Timestamp),
            "operator_id" | "operator" | "operatorid" => Some(Self::OperatorId),
            "device_id" | "device" | "deviceid" => Some(Self::DeviceId),
            "barcode" => Some(Self::Barcode),
            "location" | "ward" => Some(Self::Location),
            "test_type" | "test" | "testtype" => Some(Self::TestType),
            "event_id" | "eventid" => Some(Self::EventId),
            _ => None,
        }
    }
}

/// Raw tabular input as produced by the file-parsing collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawTable {
    /// Header cells in file order.
    pub columns: Vec<String>,
    /// Data rows; each row maps header cell to its raw value.
    pub rows: Vec<HashMap<String, String>>,
    /// Lines preceding the first data row (1 for a CSV header, 0 for JSON).
    pub header_lines: usize,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            header_lines: 1,
        }
    }

    /// Append a row given as `(column, value)` pairs.
    pub fn push_row<K, V>(&mut self, cells: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.rows
            .push(cells.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
    }

    /// 1-based row number of the data row at `index`, counting header lines.
    pub fn row_number(&self, index: usize) -> usize {
        index + 1 + self.header_lines
    }
}

/// Grouping keys available to detectors and the session clusterer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Operator,
    Device,
    Barcode,
    Location,
}

impl GroupKey {
    pub fn value<'a>(&self, event: &'a Event) -> Option<&'a str> {
        match self {
            Self::Operator => Some(event.operator_id.as_str()),
            Self::Device => Some(event.device_id.as_str()),
            Self::Barcode => event.barcode.as_deref(),
            Self::Location => event.location.as_deref(),
        }
    }
}

/// Arena indices of the events sharing one key value, sorted by
/// `(timestamp, event_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition<'a> {
    pub key: &'a str,
    pub indices: Vec<usize>,
}

/// Validated, uniquely identified test events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    /// Validate columns, parse timestamps and assign event ids.
    pub fn build(table: &RawTable) -> EngineResult<Self> {
        let mut mapping: HashMap<Column, &str> = HashMap::new();
        for header in &table.columns {
            if let Some(column) = Column::resolve(header) {
                mapping.entry(column).or_insert(header.as_str());
            }
        }

        let missing: Vec<String> = Column::REQUIRED
            .iter()
            .filter(|c| !mapping.contains_key(c))
            .map(|c| c.name().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::MissingColumns {
                missing,
                found: table.columns.clone(),
            });
        }

        let cell = |row: &HashMap<String, String>, column: Column| -> Option<String> {
            let header = mapping.get(&column)?;
            let value = row.get(*header)?.trim();
            (!value.is_empty()).then(|| value.to_string())
        };

        let mut bad_rows = Vec::new();
        let mut samples = Vec::new();
        let mut timestamps = Vec::with_capacity(table.rows.len());
        for (idx, row) in table.rows.iter().enumerate() {
            let raw = mapping
                .get(&Column::Timestamp)
                .and_then(|h| row.get(*h))
                .map(String::as_str)
                .unwrap_or("");
            match parse_timestamp(raw) {
                Some(ts) => timestamps.push(ts),
                None => {
                    bad_rows.push(table.row_number(idx));
                    if samples.len() < MAX_TIMESTAMP_SAMPLES {
                        samples.push(raw.to_string());
                    }
                }
            }
        }
        if !bad_rows.is_empty() {
            return Err(EngineError::InvalidTimestamp {
                rows: bad_rows,
                samples,
            });
        }

        for column in [Column::OperatorId, Column::DeviceId] {
            let empty: Vec<usize> = table
                .rows
                .iter()
                .enumerate()
                .filter(|(_, row)| cell(row, column).is_none())
                .map(|(idx, _)| table.row_number(idx))
                .collect();
            if !empty.is_empty() {
                return Err(EngineError::EmptyRequiredValue {
                    column: column.name().to_string(),
                    rows: empty,
                });
            }
        }

        let ids = provided_ids(table, |row| cell(row, Column::EventId));
        if ids.is_none() && mapping.contains_key(&Column::EventId) {
            debug!("Event_ID column is not a unique integer sequence; reassigning ids");
        }

        let events: Vec<Event> = table
            .rows
            .iter()
            .zip(timestamps)
            .enumerate()
            .map(|(idx, (row, timestamp))| Event {
                event_id: ids.as_ref().map_or(idx as u64 + 1, |ids| ids[idx]),
                timestamp,
                operator_id: cell(row, Column::OperatorId).unwrap_or_default(),
                device_id: cell(row, Column::DeviceId).unwrap_or_default(),
                barcode: cell(row, Column::Barcode),
                location: cell(row, Column::Location),
                test_type: cell(row, Column::TestType),
                row: table.row_number(idx),
            })
            .collect();

        info!(events = events.len(), "Event log built");
        Ok(Self { events })
    }

    /// Build a log from already-normalized events, reassigning ids when they
    /// are not unique.
    pub fn from_events(mut events: Vec<Event>) -> Self {
        let mut seen = HashSet::with_capacity(events.len());
        if !events.iter().all(|e| seen.insert(e.event_id)) {
            for (idx, event) in events.iter_mut().enumerate() {
                event.event_id = idx as u64 + 1;
            }
        }
        Self { events }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Group events by `key`, skipping events that lack it. Partitions come
    /// back ordered by key value; members by `(timestamp, event_id)`.
    pub fn partition(&self, key: GroupKey) -> Vec<Partition<'_>> {
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, event) in self.events.iter().enumerate() {
            if let Some(value) = key.value(event) {
                groups.entry(value).or_default().push(idx);
            }
        }
        groups
            .into_iter()
            .map(|(key, mut indices)| {
                self.sort_chronologically(&mut indices);
                Partition { key, indices }
            })
            .collect()
    }

    /// Sort arena indices by `(timestamp, event_id)`.
    pub fn sort_chronologically(&self, indices: &mut [usize]) {
        indices.sort_by(|&a, &b| {
            let (ea, eb) = (&self.events[a], &self.events[b]);
            ea.timestamp
                .cmp(&eb.timestamp)
                .then(ea.event_id.cmp(&eb.event_id))
        });
    }
}

/// Ids from an `Event_ID` column, kept only if every row holds a unique
/// unsigned integer.
fn provided_ids<F>(table: &RawTable, cell: F) -> Option<Vec<u64>>
where
    F: Fn(&HashMap<String, String>) -> Option<String>,
{
    let mut seen = HashSet::with_capacity(table.rows.len());
    table
        .rows
        .iter()
        .map(|row| {
            let id = cell(row)?.parse::<u64>().ok()?;
            seen.insert(id).then_some(id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[&str]]) -> RawTable {
        let mut t = RawTable::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            t.push_row(columns.iter().copied().zip(row.iter().copied()));
        }
        t
    }

    #[test]
    fn build_assigns_sequential_ids() {
        let t = table(
            &["Timestamp", "Operator_ID", "Device_ID"],
            &[
                &["2025-06-01 09:00:00", "OP1", "D1"],
                &["2025-06-01 08:00:00", "OP2", "D1"],
            ],
        );
        let log = EventLog::build(&t).unwrap();
        let ids: Vec<u64> = log.events().iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(log.events()[0].row, 2);
        assert_eq!(log.events()[0].operator_id, "OP1");
    }

    #[test]
    fn build_keeps_unique_provided_ids() {
        let t = table(
            &["Event_ID", "Timestamp", "Operator_ID", "Device_ID"],
            &[
                &["10", "2025-06-01 09:00:00", "OP1", "D1"],
                &["7", "2025-06-01 09:01:00", "OP1", "D1"],
            ],
        );
        let log = EventLog::build(&t).unwrap();
        assert_eq!(log.events()[0].event_id, 10);
        assert_eq!(log.events()[1].event_id, 7);
    }

    #[test]
    fn build_reassigns_duplicate_ids() {
        let t = table(
            &["Event_ID", "Timestamp", "Operator_ID", "Device_ID"],
            &[
                &["4", "2025-06-01 09:00:00", "OP1", "D1"],
                &["4", "2025-06-01 09:01:00", "OP1", "D1"],
            ],
        );
        let log = EventLog::build(&t).unwrap();
        assert_eq!(log.events()[0].event_id, 1);
        assert_eq!(log.events()[1].event_id, 2);
    }

    #[test]
    fn missing_columns_are_reported_before_parsing() {
        let t = table(&["Timestamp", "Operator_ID"], &[&["garbage", "OP1"]]);
        let err = EventLog::build(&t).unwrap_err();
        assert_eq!(
            err,
            EngineError::MissingColumns {
                missing: vec!["Device_ID".into()],
                found: vec!["Timestamp".into(), "Operator_ID".into()],
            }
        );
    }

    #[test]
    fn invalid_timestamps_name_rows_and_cap_samples() {
        let rows: Vec<Vec<String>> = (0..8)
            .map(|i| vec![format!("bad-{i}"), "OP1".into(), "D1".into()])
            .collect();
        let mut t = RawTable::new(vec!["Timestamp".into(), "Operator_ID".into(), "Device_ID".into()]);
        t.push_row([("Timestamp", "2025-06-01 09:00"), ("Operator_ID", "OP1"), ("Device_ID", "D1")]);
        for row in &rows {
            t.push_row([
                ("Timestamp", row[0].as_str()),
                ("Operator_ID", row[1].as_str()),
                ("Device_ID", row[2].as_str()),
            ]);
        }
        match EventLog::build(&t).unwrap_err() {
            EngineError::InvalidTimestamp { rows, samples } => {
                assert_eq!(rows, (3..=10).collect::<Vec<_>>());
                assert_eq!(samples.len(), MAX_TIMESTAMP_SAMPLES);
                assert_eq!(samples[0], "bad-0");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn empty_operator_is_rejected() {
        let t = table(
            &["Timestamp", "Operator_ID", "Device_ID"],
            &[&["2025-06-01 09:00:00", " ", "D1"]],
        );
        assert!(matches!(
            EventLog::build(&t),
            Err(EngineError::EmptyRequiredValue { ref column, .. }) if column == "Operator_ID"
        ));
    }

    #[test]
    fn aliases_resolve_legacy_headers() {
        let t = table(
            &["Timestamp", "Operator ID", "Device", "Location", "Test Type"],
            &[&["01/06/2025 09:00", "OP1", "ABL90_01", "ICU", "Glucose"]],
        );
        let log = EventLog::build(&t).unwrap();
        let event = &log.events()[0];
        assert_eq!(event.device_id, "ABL90_01");
        assert_eq!(event.location.as_deref(), Some("ICU"));
        assert_eq!(event.test_type.as_deref(), Some("Glucose"));
        assert_eq!(event.barcode, None);
    }

    #[test]
    fn empty_table_with_headers_builds_empty_log() {
        let t = table(&["Timestamp", "Operator_ID", "Device_ID"], &[]);
        let log = EventLog::build(&t).unwrap();
        assert!(log.is_empty());
        assert!(log.partition(GroupKey::Operator).is_empty());
    }

    #[test]
    fn partitions_sort_by_time_then_id() {
        let t = table(
            &["Timestamp", "Operator_ID", "Device_ID", "Barcode"],
            &[
                &["2025-06-01 09:05:00", "OP1", "D1", "B1"],
                &["2025-06-01 09:00:00", "OP1", "D2", ""],
                &["2025-06-01 09:00:00", "OP1", "D1", "B1"],
                &["2025-06-01 08:00:00", "OP2", "D1", "B2"],
            ],
        );
        let log = EventLog::build(&t).unwrap();
        let by_op = log.partition(GroupKey::Operator);
        assert_eq!(by_op.len(), 2);
        assert_eq!(by_op[0].key, "OP1");
        assert_eq!(by_op[0].indices, vec![1, 2, 0]);

        let by_barcode = log.partition(GroupKey::Barcode);
        assert_eq!(by_barcode.len(), 2);
        assert_eq!(by_barcode[0].indices, vec![2, 0]);
    }
}
