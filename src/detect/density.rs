//! Detectors built on per-operator bucket counts.

use std::collections::HashMap;

use super::{Detector, flag_partitions, invalid};
use crate::bucketing::{hour_of_day, local_bucket_id};
use crate::error::EngineResult;
use crate::model::{EventLog, Flag, GroupKey};
use crate::stats::{mean, median, z_scores};

/// Count the members of `indices` per bucket and return, per member, the
/// count of its own bucket together with the distinct bucket counts.
fn bucket_counts<F>(indices: &[usize], bucket_of: F) -> (Vec<f64>, Vec<f64>)
where
    F: Fn(usize) -> i64,
{
    let buckets: Vec<i64> = indices.iter().map(|&i| bucket_of(i)).collect();
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for b in &buckets {
        *counts.entry(*b).or_insert(0) += 1;
    }
    let per_event = buckets.iter().map(|b| counts[b] as f64).collect();
    let mut distinct: Vec<(i64, usize)> = counts.into_iter().collect();
    distinct.sort_unstable();
    (per_event, distinct.into_iter().map(|(_, n)| n as f64).collect())
}

/// Hours of the day in which an operator is unusually busy compared with
/// their other active hours.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyOutlier {
    pub z_cutoff: f64,
}

impl Detector for HourlyOutlier {
    fn flag(&self) -> Flag {
        Flag::HourlyOutlier
    }

    fn detect(&self, log: &EventLog) -> EngineResult<Vec<bool>> {
        if !self.z_cutoff.is_finite() {
            return Err(invalid(Flag::HourlyOutlier, "z cutoff must be finite"));
        }
        let cutoff = self.z_cutoff;
        Ok(flag_partitions(log, GroupKey::Operator, |log, indices| {
            let events = log.events();
            let mut per_hour = [0usize; 24];
            for &i in indices {
                per_hour[hour_of_day(&events[i].timestamp) as usize] += 1;
            }
            let active: Vec<usize> = (0..24).filter(|h| per_hour[*h] > 0).collect();
            let counts: Vec<f64> = active.iter().map(|h| per_hour[*h] as f64).collect();
            let Some(z) = z_scores(&counts) else {
                return vec![false; indices.len()];
            };
            let mut outlier = [false; 24];
            for (h, score) in active.iter().zip(z) {
                outlier[*h] = score > cutoff;
            }
            indices
                .iter()
                .map(|&i| outlier[hour_of_day(&events[i].timestamp) as usize])
                .collect()
        }))
    }
}

/// Shifts (local wall clock) in which an operator's test count strays from
/// their median shift.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftDeviation {
    pub width_hours: u32,
    pub deviation_threshold: f64,
}

impl Detector for ShiftDeviation {
    fn flag(&self) -> Flag {
        Flag::ShiftDeviation
    }

    fn detect(&self, log: &EventLog) -> EngineResult<Vec<bool>> {
        if self.width_hours == 0 {
            return Err(invalid(Flag::ShiftDeviation, "shift width must be at least one hour"));
        }
        if !self.deviation_threshold.is_finite() || self.deviation_threshold < 0.0 {
            return Err(invalid(
                Flag::ShiftDeviation,
                format!("deviation threshold must be non-negative, got {}", self.deviation_threshold),
            ));
        }
        let width_secs = i64::from(self.width_hours) * 3600;
        let threshold = self.deviation_threshold;
        Ok(flag_partitions(log, GroupKey::Operator, |log, indices| {
            let events = log.events();
            let (own, all) =
                bucket_counts(indices, |i| local_bucket_id(&events[i].timestamp, width_secs));
            let Some(mid) = median(&all) else {
                return vec![false; indices.len()];
            };
            own.into_iter().map(|n| (n - mid).abs() > threshold).collect()
        }))
    }
}

/// Operators whose total volume exceeds a multiple of the mean per-operator
/// volume. Every event of such an operator is flagged.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadDeviation {
    pub multiplier: f64,
}

impl Detector for LoadDeviation {
    fn flag(&self) -> Flag {
        Flag::LoadDeviation
    }

    fn detect(&self, log: &EventLog) -> EngineResult<Vec<bool>> {
        if !self.multiplier.is_finite() || self.multiplier < 0.0 {
            return Err(invalid(
                Flag::LoadDeviation,
                format!("multiplier must be non-negative, got {}", self.multiplier),
            ));
        }
        let mut totals: HashMap<&str, usize> = HashMap::new();
        for event in log.events() {
            *totals.entry(event.operator_id.as_str()).or_insert(0) += 1;
        }
        let values: Vec<f64> = totals.values().map(|n| *n as f64).collect();
        let Some(avg) = mean(&values) else {
            return Ok(Vec::new());
        };
        let limit = self.multiplier * avg;
        Ok(log
            .events()
            .iter()
            .map(|e| totals[e.operator_id.as_str()] as f64 > limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::test_support::{flagged_ids, log};

    #[test]
    fn hourly_outlier_flags_busy_hour() {
        // OP1: one test at 08, 10, 12, 14, 16 and six at 11.
        let mut rows = vec![
            ("2025-06-01 08:00:00", "OP1", "D1", "", ""),
            ("2025-06-01 10:00:00", "OP1", "D1", "", ""),
            ("2025-06-01 12:00:00", "OP1", "D1", "", ""),
            ("2025-06-01 14:00:00", "OP1", "D1", "", ""),
            ("2025-06-01 16:00:00", "OP1", "D1", "", ""),
        ];
        for ts in [
            "2025-06-01 11:00:00",
            "2025-06-01 11:05:00",
            "2025-06-01 11:10:00",
            "2025-06-01 11:15:00",
            "2025-06-01 11:20:00",
            "2025-06-01 11:25:00",
        ] {
            rows.push((ts, "OP1", "D1", "", ""));
        }
        let log = log(&rows);
        let detector = HourlyOutlier { z_cutoff: 2.0 };
        // counts [1,1,6,1,1,1]: mean 11/6, z(6) ~ 2.236
        assert_eq!(
            flagged_ids(&log, &detector.detect(&log).unwrap()),
            vec![6, 7, 8, 9, 10, 11]
        );
    }

    #[test]
    fn hourly_outlier_needs_two_active_hours() {
        let log = log(&[
            ("2025-06-01 09:00:00", "OP1", "D1", "", ""),
            ("2025-06-01 09:10:00", "OP1", "D1", "", ""),
        ]);
        let detector = HourlyOutlier { z_cutoff: 0.0 };
        assert!(flagged_ids(&log, &detector.detect(&log).unwrap()).is_empty());
    }

    #[test]
    fn shift_deviation_against_median() {
        let mut rows = vec![
            ("2025-06-01 01:00:00", "OP1", "D1", "", ""),
            ("2025-06-01 17:00:00", "OP1", "D1", "", ""),
        ];
        for ts in [
            "2025-06-01 09:00:00",
            "2025-06-01 09:10:00",
            "2025-06-01 09:20:00",
            "2025-06-01 09:30:00",
            "2025-06-01 09:40:00",
        ] {
            rows.push((ts, "OP1", "D1", "", ""));
        }
        let log = log(&rows);
        let detector = ShiftDeviation {
            width_hours: 8,
            deviation_threshold: 3.0,
        };
        // shifts [00-08)=1, [08-16)=5, [16-24)=1; median 1; |5 - 1| > 3
        assert_eq!(
            flagged_ids(&log, &detector.detect(&log).unwrap()),
            vec![3, 4, 5, 6, 7]
        );
    }

    #[test]
    fn shift_deviation_uses_local_shifts() {
        // Local shifts [00-08)=4, [08-16)=1, [16-24)=1. On the UTC clock the
        // 08:10 test would fall into the early shift.
        let log = log(&[
            ("2025-06-01T07:10:00+02:00", "OP1", "D1", "", ""),
            ("2025-06-01T07:20:00+02:00", "OP1", "D1", "", ""),
            ("2025-06-01T07:30:00+02:00", "OP1", "D1", "", ""),
            ("2025-06-01T07:40:00+02:00", "OP1", "D1", "", ""),
            ("2025-06-01T08:10:00+02:00", "OP1", "D1", "", ""),
            ("2025-06-01T17:00:00+02:00", "OP1", "D1", "", ""),
        ]);
        let detector = ShiftDeviation {
            width_hours: 8,
            deviation_threshold: 2.0,
        };
        assert_eq!(
            flagged_ids(&log, &detector.detect(&log).unwrap()),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn load_deviation_flags_heavy_operator() {
        let mut rows = vec![
            ("2025-06-01 09:00:00", "OP2", "D1", "", ""),
            ("2025-06-01 09:00:00", "OP3", "D1", "", ""),
        ];
        for ts in ["2025-06-01 10:00:00", "2025-06-01 11:00:00", "2025-06-01 12:00:00", "2025-06-01 13:00:00"] {
            rows.push((ts, "OP1", "D1", "", ""));
        }
        let log = log(&rows);
        // totals 4, 1, 1: mean 2, limit 3
        let detector = LoadDeviation { multiplier: 1.5 };
        assert_eq!(
            flagged_ids(&log, &detector.detect(&log).unwrap()),
            vec![3, 4, 5, 6]
        );
    }

    #[test]
    fn load_deviation_on_empty_log() {
        let detector = LoadDeviation { multiplier: 1.5 };
        assert!(detector.detect(&EventLog::default()).unwrap().is_empty());
    }
}
