//! Detectors that compare each event with its chronological neighbours.

use std::collections::HashSet;

use super::{Detector, flag_partitions, invalid, secs_to_millis};
use crate::bucketing::epoch_millis;
use crate::error::EngineResult;
use crate::model::{EventLog, Flag, GroupKey};

/// Tests logged less than `threshold_secs` after the previous test of the
/// same key. The first event of a group has no predecessor and never flags.
#[derive(Debug, Clone, PartialEq)]
pub struct RapidSuccession {
    pub threshold_secs: f64,
    pub key: GroupKey,
}

impl Detector for RapidSuccession {
    fn flag(&self) -> Flag {
        Flag::Rapid
    }

    fn detect(&self, log: &EventLog) -> EngineResult<Vec<bool>> {
        if !self.threshold_secs.is_finite() || self.threshold_secs < 0.0 {
            return Err(invalid(
                Flag::Rapid,
                format!("threshold must be non-negative, got {}", self.threshold_secs),
            ));
        }
        let threshold_ms = secs_to_millis(self.threshold_secs);
        Ok(flag_partitions(log, self.key, |log, indices| {
            let events = log.events();
            let mut out = vec![false; indices.len()];
            for pos in 1..indices.len() {
                let gap = epoch_millis(&events[indices[pos]].timestamp)
                    - epoch_millis(&events[indices[pos - 1]].timestamp);
                out[pos] = gap < threshold_ms;
            }
            out
        }))
    }
}

/// An operator's location changing within `travel_threshold_secs` of their
/// previous test. Missing locations on either side never flag.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationConflict {
    pub travel_threshold_secs: f64,
}

impl Detector for LocationConflict {
    fn flag(&self) -> Flag {
        Flag::LocConflict
    }

    fn detect(&self, log: &EventLog) -> EngineResult<Vec<bool>> {
        if !self.travel_threshold_secs.is_finite() || self.travel_threshold_secs < 0.0 {
            return Err(invalid(
                Flag::LocConflict,
                format!(
                    "travel threshold must be non-negative, got {}",
                    self.travel_threshold_secs
                ),
            ));
        }
        let travel_ms = secs_to_millis(self.travel_threshold_secs);
        Ok(flag_partitions(log, GroupKey::Operator, |log, indices| {
            let events = log.events();
            let mut out = vec![false; indices.len()];
            for pos in 1..indices.len() {
                let prev = &events[indices[pos - 1]];
                let cur = &events[indices[pos]];
                let moved = matches!(
                    (&prev.location, &cur.location),
                    (Some(a), Some(b)) if a != b
                );
                let gap = epoch_millis(&cur.timestamp) - epoch_millis(&prev.timestamp);
                out[pos] = moved && gap <= travel_ms;
            }
            out
        }))
    }
}

/// One operator recorded at the same instant on more than one device or in
/// more than one location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoLocation;

impl Detector for CoLocation {
    fn flag(&self) -> Flag {
        Flag::CoLocation
    }

    fn detect(&self, log: &EventLog) -> EngineResult<Vec<bool>> {
        Ok(flag_partitions(log, GroupKey::Operator, |log, indices| {
            let events = log.events();
            let mut out = vec![false; indices.len()];
            let mut start = 0;
            while start < indices.len() {
                let ts = events[indices[start]].timestamp;
                let end = start
                    + indices[start..]
                        .iter()
                        .take_while(|&&i| events[i].timestamp == ts)
                        .count();
                let run = &indices[start..end];
                if run.len() > 1 {
                    let devices: HashSet<&str> =
                        run.iter().map(|&i| events[i].device_id.as_str()).collect();
                    let locations: HashSet<&str> = run
                        .iter()
                        .filter_map(|&i| events[i].location.as_deref())
                        .collect();
                    if devices.len() > 1 || locations.len() > 1 {
                        out[start..end].fill(true);
                    }
                }
                start = end;
            }
            out
        }))
    }
}
