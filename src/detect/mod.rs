//! Built-in misuse detectors.
//!
//! Every detector reads the [`EventLog`] and returns one boolean per event
//! (arena order). Detectors never see each other's output, so the pipeline
//! runs them concurrently on the rayon pool and assembles the per-event
//! [`FlagSet`]s into a [`DetectedLog`]. Custom rules then run over the same
//! log, and only their completion yields the [`FlaggedLog`] that scoring and
//! sessions consume.
//!
//! - [`sequence`]: predecessor scans (rapid succession, location conflict,
//!   co-location)
//! - [`window`]: two-pointer sliding windows (key sharing, device hopping)
//! - [`density`]: bucket statistics (hourly outliers, shift deviation, load)
//! - [`clock`]: off-shift tests
//! - [`ward`]: rare device/location pairings

pub mod clock;
pub mod density;
pub mod sequence;
pub mod ward;
pub mod window;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::config::DetectorConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::{Event, EventLog, Flag, FlagSet, FlaggedEvent, FlaggedRecord, GroupKey};
use crate::rules::{RuleFailure, RuleRegistry};

pub use clock::ShiftViolation;
pub use density::{HourlyOutlier, LoadDeviation, ShiftDeviation};
pub use sequence::{CoLocation, LocationConflict, RapidSuccession};
pub use ward::WardMismatch;
pub use window::{DeviceHopping, KeySharing, naive_distinct, sliding_distinct};

/// A rule that raises one flag column.
pub trait Detector: Send + Sync {
    /// The column this detector owns.
    fn flag(&self) -> Flag;

    /// One boolean per event, in arena order.
    fn detect(&self, log: &EventLog) -> EngineResult<Vec<bool>>;
}

/// The enabled built-in detectors for a configuration, in flag order.
pub fn builtin_detectors(config: &DetectorConfig) -> Vec<Box<dyn Detector>> {
    let all: Vec<Box<dyn Detector>> = vec![
        Box::new(RapidSuccession {
            threshold_secs: config.rapid.threshold_secs,
            key: config.rapid.key.group_key(),
        }),
        Box::new(LocationConflict {
            travel_threshold_secs: config.location.travel_threshold_secs,
        }),
        Box::new(KeySharing {
            key: config.sharing.key.group_key(),
            window_minutes: config.sharing.window_minutes,
            share_threshold: config.sharing.share_threshold,
        }),
        Box::new(DeviceHopping {
            window_minutes: config.hopping.window_minutes,
            hop_threshold: config.hopping.hop_threshold,
        }),
        Box::new(HourlyOutlier {
            z_cutoff: config.hourly.z_cutoff,
        }),
        Box::new(ShiftDeviation {
            width_hours: config.shift.width_hours,
            deviation_threshold: config.shift.deviation_threshold,
        }),
        Box::new(ShiftViolation {
            start_hour: config.shift.start_hour,
            end_hour: config.shift.end_hour,
        }),
        Box::new(LoadDeviation {
            multiplier: config.load.multiplier,
        }),
        Box::new(CoLocation),
        Box::new(WardMismatch {
            rarity_threshold: config.ward.rarity_threshold,
        }),
    ];
    all.into_iter()
        .filter(|d| config.is_enabled(d.flag()))
        .collect()
}

/// Run every detector concurrently and assemble the flag sets.
///
/// The first detector error aborts the pass; no partial result is returned.
pub fn run_detectors(log: EventLog, detectors: &[Box<dyn Detector>]) -> EngineResult<DetectedLog> {
    let columns: Vec<(Flag, Vec<bool>)> = detectors
        .par_iter()
        .map(|detector| {
            let column = detector.detect(&log)?;
            if column.len() != log.len() {
                return Err(EngineError::Detector {
                    detector: detector.flag().column(),
                    reason: format!(
                        "returned {} flags for {} events",
                        column.len(),
                        log.len()
                    ),
                });
            }
            debug!(
                flag = %detector.flag(),
                flagged = column.iter().filter(|f| **f).count(),
                "Detector finished"
            );
            Ok((detector.flag(), column))
        })
        .collect::<EngineResult<_>>()?;

    let mut flags = vec![FlagSet::default(); log.len()];
    for (flag, column) in columns {
        for (set, value) in flags.iter_mut().zip(column) {
            set.set(flag, value);
        }
    }
    Ok(DetectedLog { log, flags })
}

/// An event log whose built-in detectors have all completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedLog {
    log: EventLog,
    flags: Vec<FlagSet>,
}

impl DetectedLog {
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn flags(&self) -> &[FlagSet] {
        &self.flags
    }

    pub fn flags_of(&self, index: usize) -> FlagSet {
        self.flags.get(index).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Event, &FlagSet)> {
        self.log.events().iter().zip(self.flags.iter())
    }

    /// Run `rules` over the log and attach their labels to the events they
    /// name. Records for unknown event ids stay in the record list but flag
    /// nothing.
    pub fn apply_rules(self, rules: &RuleRegistry) -> (FlaggedLog, Vec<RuleFailure>) {
        let outcome = rules.apply_all(&self.log);

        let by_id: FxHashMap<u64, usize> = self
            .log
            .events()
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.event_id, idx))
            .collect();
        let mut labels: Vec<Vec<String>> = vec![Vec::new(); self.log.len()];
        for record in &outcome.records {
            match by_id.get(&record.event_id) {
                Some(&idx) => {
                    if !labels[idx].contains(&record.label) {
                        labels[idx].push(record.label.clone());
                    }
                }
                None => warn!(
                    event_id = record.event_id,
                    label = %record.label,
                    "Rule record names an unknown event"
                ),
            }
        }

        let mut records: Vec<FlaggedRecord> = self
            .iter()
            .flat_map(|(event, flags)| {
                flags
                    .raised()
                    .map(move |flag| FlaggedRecord::new(event.event_id, flag.column()))
                    .collect::<Vec<_>>()
            })
            .collect();
        records.extend(outcome.records);

        let flagged = FlaggedLog {
            log: self.log,
            flags: self.flags,
            rules: labels,
            records,
        };
        (flagged, outcome.failures)
    }
}

/// An event log whose detectors and rules have all completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlaggedLog {
    log: EventLog,
    flags: Vec<FlagSet>,
    rules: Vec<Vec<String>>,
    records: Vec<FlaggedRecord>,
}

impl FlaggedLog {
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn flags(&self) -> &[FlagSet] {
        &self.flags
    }

    pub fn flags_of(&self, index: usize) -> FlagSet {
        self.flags.get(index).copied().unwrap_or_default()
    }

    /// Rule labels attached to the event at `index`.
    pub fn rules_of(&self, index: usize) -> &[String] {
        self.rules.get(index).map_or(&[], Vec::as_slice)
    }

    /// True iff a detector or a rule flagged the event at `index`.
    pub fn is_flagged(&self, index: usize) -> bool {
        self.flags_of(index).any() || !self.rules_of(index).is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Event, &FlagSet)> {
        self.log.events().iter().zip(self.flags.iter())
    }

    /// The flagged event table: every event with its flag columns and rule labels.
    pub fn rows(&self) -> Vec<FlaggedEvent> {
        self.iter()
            .enumerate()
            .map(|(idx, (event, flags))| FlaggedEvent {
                event: event.clone(),
                flags: *flags,
                rules: self.rules_of(idx).to_vec(),
            })
            .collect()
    }

    /// One record per raised built-in flag, labelled with the flag column,
    /// followed by the rule records in registration order.
    pub fn records(&self) -> &[FlaggedRecord] {
        &self.records
    }
}

/// Evaluate `scan` on every partition of `key` in parallel and scatter the
/// per-partition flags back to arena order. Events without the key stay false.
pub(crate) fn flag_partitions<F>(log: &EventLog, key: GroupKey, scan: F) -> Vec<bool>
where
    F: Fn(&EventLog, &[usize]) -> Vec<bool> + Sync,
{
    let scanned: Vec<(Vec<usize>, Vec<bool>)> = log
        .partition(key)
        .into_par_iter()
        .map(|partition| {
            let flags = scan(log, &partition.indices);
            (partition.indices, flags)
        })
        .collect();

    let mut out = vec![false; log.len()];
    for (indices, flags) in scanned {
        for (idx, flag) in indices.into_iter().zip(flags) {
            out[idx] = flag;
        }
    }
    out
}

/// Convert a duration in seconds to whole milliseconds.
pub(crate) fn secs_to_millis(secs: f64) -> i64 {
    (secs * 1000.0).round() as i64
}

pub(crate) fn invalid(flag: Flag, reason: impl Into<String>) -> EngineError {
    EngineError::Detector {
        detector: flag.column(),
        reason: reason.into(),
    }
}
