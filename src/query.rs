//! Predicate filters over analysis results.
//!
//! Every non-empty criterion narrows the result; empty criteria match
//! everything. Filters return borrowed views in source order.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::timestamp::Timestamp;
use crate::model::{Event, Flag, FlaggedEvent, FlaggedRecord, OperatorScore};

/// Inclusive bounds on the event instant; a missing side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

impl DateRange {
    pub fn contains(&self, ts: &Timestamp) -> bool {
        self.start.is_none_or(|start| *ts >= start) && self.end.is_none_or(|end| *ts <= end)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub operator_ids: Vec<String>,
    pub device_ids: Vec<String>,
    pub barcodes: Vec<String>,
    /// Keep events raising at least one of these flags.
    pub flags: Vec<Flag>,
    pub date_range: DateRange,
    /// Minimum suspicion score of the event's operator.
    pub min_score: Option<f64>,
}

impl FilterCriteria {
    pub fn is_empty(&self) -> bool {
        self.operator_ids.is_empty()
            && self.device_ids.is_empty()
            && self.barcodes.is_empty()
            && self.flags.is_empty()
            && self.date_range.is_unbounded()
            && self.min_score.is_none()
    }
}

/// Criteria compiled against one set of operator scores.
struct Matcher<'a> {
    criteria: &'a FilterCriteria,
    operators: HashSet<&'a str>,
    devices: HashSet<&'a str>,
    barcodes: HashSet<&'a str>,
    scores: HashMap<&'a str, f64>,
}

impl<'a> Matcher<'a> {
    fn new(criteria: &'a FilterCriteria, scores: &'a [OperatorScore]) -> Self {
        Self {
            criteria,
            operators: criteria.operator_ids.iter().map(String::as_str).collect(),
            devices: criteria.device_ids.iter().map(String::as_str).collect(),
            barcodes: criteria.barcodes.iter().map(String::as_str).collect(),
            scores: scores
                .iter()
                .map(|s| (s.operator_id.as_str(), s.suspicion_score))
                .collect(),
        }
    }

    /// Every criterion except the flag list.
    fn event(&self, event: &Event) -> bool {
        (self.operators.is_empty() || self.operators.contains(event.operator_id.as_str()))
            && (self.devices.is_empty() || self.devices.contains(event.device_id.as_str()))
            && (self.barcodes.is_empty()
                || event
                    .barcode
                    .as_deref()
                    .is_some_and(|b| self.barcodes.contains(b)))
            && self.criteria.date_range.contains(&event.timestamp)
            && self.criteria.min_score.is_none_or(|min| {
                self.scores
                    .get(event.operator_id.as_str())
                    .is_some_and(|score| *score >= min)
            })
    }
}

/// Flagged events matching every criterion. The flag list keeps events
/// raising any of the listed flags.
pub fn filter_events<'e>(
    events: &'e [FlaggedEvent],
    scores: &[OperatorScore],
    criteria: &FilterCriteria,
) -> Vec<&'e FlaggedEvent> {
    let matcher = Matcher::new(criteria, scores);
    events
        .iter()
        .filter(|row| {
            (criteria.flags.is_empty() || criteria.flags.iter().any(|f| row.flags.get(*f)))
                && matcher.event(&row.event)
        })
        .collect()
}

/// Records whose event matches the criteria. The flag list matches record
/// labels against flag column names, so custom rule labels only pass when no
/// flag filter is set.
pub fn filter_records<'r>(
    records: &'r [FlaggedRecord],
    events: &[FlaggedEvent],
    scores: &[OperatorScore],
    criteria: &FilterCriteria,
) -> Vec<&'r FlaggedRecord> {
    let matcher = Matcher::new(criteria, scores);
    let by_id: HashMap<u64, &Event> = events.iter().map(|e| (e.event.event_id, &e.event)).collect();
    records
        .iter()
        .filter(|record| {
            let label_ok = criteria.flags.is_empty()
                || Flag::from_column(&record.label).is_some_and(|f| criteria.flags.contains(&f));
            label_ok
                && by_id
                    .get(&record.event_id)
                    .is_some_and(|event| matcher.event(event))
        })
        .collect()
}
