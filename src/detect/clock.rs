//! Off-shift testing.

use chrono::NaiveTime;

use super::{Detector, invalid};
use crate::error::EngineResult;
use crate::model::{EventLog, Flag};

/// Tests logged before `start_hour:00` or after `end_hour:00`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftViolation {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Detector for ShiftViolation {
    fn flag(&self) -> Flag {
        Flag::ShiftViolation
    }

    fn detect(&self, log: &EventLog) -> EngineResult<Vec<bool>> {
        let bound = |hour: u32| {
            NaiveTime::from_hms_opt(hour, 0, 0).ok_or_else(|| {
                invalid(Flag::ShiftViolation, format!("hour {hour} is out of range"))
            })
        };
        let start = bound(self.start_hour)?;
        let end = bound(self.end_hour)?;
        if start > end {
            return Err(invalid(
                Flag::ShiftViolation,
                format!("shift starts at {} but ends at {}", self.start_hour, self.end_hour),
            ));
        }
        Ok(log
            .events()
            .iter()
            .map(|e| {
                let time = e.timestamp.time();
                time < start || time > end
            })
            .collect())
    }
}
