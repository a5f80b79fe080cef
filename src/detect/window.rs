//! Sliding-window detectors.
//!
//! Both detectors count distinct values of one field among the events of a
//! partition whose timestamps fall in `[t - before, t + after]`. The
//! two-pointer scan is amortized linear in the partition size; the naive
//! rescan is kept for tests and benchmarks.

use rustc_hash::FxHashMap;

use super::{Detector, flag_partitions, invalid, secs_to_millis};
use crate::bucketing::epoch_millis;
use crate::error::EngineResult;
use crate::model::{EventLog, Flag, GroupKey};

/// Distinct `value`s in the window around each member of `indices`.
///
/// `indices` must be sorted chronologically, as partitions are. Events
/// without a `value` occupy the window but are not counted. Window edges
/// saturate at the ends of the `i64` millisecond axis.
pub fn sliding_distinct(
    log: &EventLog,
    indices: &[usize],
    value: GroupKey,
    before_ms: i64,
    after_ms: i64,
) -> Vec<usize> {
    let events = log.events();
    let times: Vec<i64> = indices
        .iter()
        .map(|&i| epoch_millis(&events[i].timestamp))
        .collect();

    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    let mut out = Vec::with_capacity(indices.len());
    let (mut lo, mut hi) = (0, 0);

    for &t in &times {
        let (from, to) = (t.saturating_sub(before_ms), t.saturating_add(after_ms));
        while hi < indices.len() && times[hi] <= to {
            if let Some(v) = value.value(&events[indices[hi]]) {
                *counts.entry(v).or_insert(0) += 1;
            }
            hi += 1;
        }
        while lo < hi && times[lo] < from {
            if let Some(v) = value.value(&events[indices[lo]])
                && let Some(n) = counts.get_mut(v)
            {
                *n -= 1;
                if *n == 0 {
                    counts.remove(v);
                }
            }
            lo += 1;
        }
        out.push(counts.len());
    }
    out
}

/// Quadratic reference implementation of [`sliding_distinct`].
pub fn naive_distinct(
    log: &EventLog,
    indices: &[usize],
    value: GroupKey,
    before_ms: i64,
    after_ms: i64,
) -> Vec<usize> {
    let events = log.events();
    indices
        .iter()
        .map(|&i| {
            let t = epoch_millis(&events[i].timestamp);
            let (from, to) = (t.saturating_sub(before_ms), t.saturating_add(after_ms));
            let mut seen: Vec<&str> = indices
                .iter()
                .filter(|&&j| {
                    let u = epoch_millis(&events[j].timestamp);
                    u >= from && u <= to
                })
                .filter_map(|&j| value.value(&events[j]))
                .collect();
            seen.sort_unstable();
            seen.dedup();
            seen.len()
        })
        .collect()
}

fn window_ms(flag: Flag, minutes: f64) -> EngineResult<i64> {
    if !minutes.is_finite() || minutes <= 0.0 {
        return Err(invalid(flag, format!("window must be positive, got {minutes} minutes")));
    }
    Ok(secs_to_millis(minutes * 60.0))
}

/// Many operators scanning the same barcode (or using the same device) in a
/// short symmetric window.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySharing {
    pub key: GroupKey,
    pub window_minutes: f64,
    pub share_threshold: usize,
}

impl Detector for KeySharing {
    fn flag(&self) -> Flag {
        Flag::SharedKey
    }

    fn detect(&self, log: &EventLog) -> EngineResult<Vec<bool>> {
        let window = window_ms(Flag::SharedKey, self.window_minutes)?;
        if self.share_threshold == 0 {
            return Err(invalid(Flag::SharedKey, "share threshold must be at least 1"));
        }
        let threshold = self.share_threshold;
        Ok(flag_partitions(log, self.key, |log, indices| {
            sliding_distinct(log, indices, GroupKey::Operator, window, window)
                .into_iter()
                .map(|n| n >= threshold)
                .collect()
        }))
    }
}

/// An operator cycling through more than `hop_threshold` devices within the
/// trailing window.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceHopping {
    pub window_minutes: f64,
    pub hop_threshold: usize,
}

impl Detector for DeviceHopping {
    fn flag(&self) -> Flag {
        Flag::DeviceHop
    }

    fn detect(&self, log: &EventLog) -> EngineResult<Vec<bool>> {
        let window = window_ms(Flag::DeviceHop, self.window_minutes)?;
        let threshold = self.hop_threshold;
        Ok(flag_partitions(log, GroupKey::Operator, |log, indices| {
            sliding_distinct(log, indices, GroupKey::Device, window, 0)
                .into_iter()
                .map(|n| n > threshold)
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::test_support::{flagged_ids, log};

    fn b1_log() -> EventLog {
        log(&[
            ("2025-06-01 09:00:00", "OP1", "D1", "B1", ""),
            ("2025-06-01 09:02:00", "OP2", "D1", "B1", ""),
            ("2025-06-01 09:04:00", "OP3", "D1", "B1", ""),
        ])
    }

    #[test]
    fn shared_barcode_three_operators() {
        let log = b1_log();
        let three = KeySharing {
            key: GroupKey::Barcode,
            window_minutes: 5.0,
            share_threshold: 3,
        };
        assert_eq!(flagged_ids(&log, &three.detect(&log).unwrap()), vec![1, 2, 3]);

        let four = KeySharing {
            share_threshold: 4,
            ..three
        };
        assert!(flagged_ids(&log, &four.detect(&log).unwrap()).is_empty());
    }

    #[test]
    fn sharing_window_is_symmetric_and_inclusive() {
        let log = log(&[
            ("2025-06-01 09:00:00", "OP1", "D1", "B1", ""),
            ("2025-06-01 09:05:00", "OP2", "D1", "B1", ""),
            ("2025-06-01 09:10:00", "OP3", "D1", "B1", ""),
            ("2025-06-01 09:10:01", "OP4", "D1", "B1", ""),
        ]);
        let detector = KeySharing {
            key: GroupKey::Barcode,
            window_minutes: 5.0,
            share_threshold: 3,
        };
        // Event 2 sees OP1 and OP3 exactly at the edges; event 3 sees OP2 and
        // OP4. Event 4 is one second past OP2's reach.
        assert_eq!(flagged_ids(&log, &detector.detect(&log).unwrap()), vec![2, 3]);
    }

    #[test]
    fn sharing_by_device_key() {
        let log = log(&[
            ("2025-06-01 09:00:00", "OP1", "D1", "", ""),
            ("2025-06-01 09:01:00", "OP2", "D1", "", ""),
            ("2025-06-01 09:01:00", "OP3", "D2", "", ""),
        ]);
        let detector = KeySharing {
            key: GroupKey::Device,
            window_minutes: 5.0,
            share_threshold: 2,
        };
        assert_eq!(flagged_ids(&log, &detector.detect(&log).unwrap()), vec![1, 2]);
    }

    #[test]
    fn hopping_uses_trailing_window() {
        let log = log(&[
            ("2025-06-01 09:00:00", "OP1", "D1", "", ""),
            ("2025-06-01 09:01:00", "OP1", "D2", "", ""),
            ("2025-06-01 09:02:00", "OP1", "D3", "", ""),
            ("2025-06-01 09:20:00", "OP1", "D1", "", ""),
        ]);
        let detector = DeviceHopping {
            window_minutes: 5.0,
            hop_threshold: 2,
        };
        assert_eq!(flagged_ids(&log, &detector.detect(&log).unwrap()), vec![3]);
    }

    #[test]
    fn zero_window_is_rejected() {
        let log = b1_log();
        let detector = DeviceHopping {
            window_minutes: 0.0,
            hop_threshold: 2,
        };
        assert!(detector.detect(&log).is_err());
    }

    #[test]
    fn unbounded_windows_saturate() {
        let log = b1_log();
        for partition in log.partition(GroupKey::Barcode) {
            for (before, after) in [(i64::MAX, i64::MAX), (i64::MAX, 0), (0, i64::MAX)] {
                let sliding =
                    sliding_distinct(&log, &partition.indices, GroupKey::Operator, before, after);
                assert_eq!(
                    sliding,
                    naive_distinct(&log, &partition.indices, GroupKey::Operator, before, after)
                );
            }
            assert_eq!(
                sliding_distinct(&log, &partition.indices, GroupKey::Operator, i64::MAX, i64::MAX),
                vec![3, 3, 3]
            );
        }

        let huge = KeySharing {
            key: GroupKey::Barcode,
            window_minutes: 1e300,
            share_threshold: 3,
        };
        assert_eq!(flagged_ids(&log, &huge.detect(&log).unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn two_pointer_matches_naive_scan() {
        let log = log(&[
            ("2025-06-01 09:00:00", "OP1", "D1", "B1", ""),
            ("2025-06-01 09:00:00", "OP2", "D2", "B1", ""),
            ("2025-06-01 09:03:00", "OP1", "D3", "B1", ""),
            ("2025-06-01 09:07:00", "OP3", "D1", "B1", ""),
            ("2025-06-01 09:08:00", "OP2", "D2", "B1", ""),
            ("2025-06-01 09:30:00", "OP4", "D2", "B1", ""),
        ]);
        for partition in log.partition(GroupKey::Barcode) {
            for (before, after) in [(300_000, 300_000), (300_000, 0), (0, 0), (60_000, 600_000)] {
                assert_eq!(
                    sliding_distinct(&log, &partition.indices, GroupKey::Operator, before, after),
                    naive_distinct(&log, &partition.indices, GroupKey::Operator, before, after),
                );
            }
        }
    }
}
