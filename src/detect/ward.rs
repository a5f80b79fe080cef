//! Devices turning up in wards where they are rarely used.

use std::collections::HashMap;

use super::{Detector, invalid};
use crate::error::EngineResult;
use crate::model::{EventLog, Flag};

/// Events whose (device, location) pair accounts for less than
/// `rarity_threshold` of the device's located events. Events without a
/// location never flag.
#[derive(Debug, Clone, PartialEq)]
pub struct WardMismatch {
    pub rarity_threshold: f64,
}

impl Detector for WardMismatch {
    fn flag(&self) -> Flag {
        Flag::WardMismatch
    }

    fn detect(&self, log: &EventLog) -> EngineResult<Vec<bool>> {
        if !(0.0..=1.0).contains(&self.rarity_threshold) {
            return Err(invalid(
                Flag::WardMismatch,
                format!("rarity threshold must lie in [0, 1], got {}", self.rarity_threshold),
            ));
        }
        let mut per_device: HashMap<&str, usize> = HashMap::new();
        let mut per_pair: HashMap<(&str, &str), usize> = HashMap::new();
        for event in log.events() {
            if let Some(location) = event.location.as_deref() {
                *per_device.entry(event.device_id.as_str()).or_insert(0) += 1;
                *per_pair
                    .entry((event.device_id.as_str(), location))
                    .or_insert(0) += 1;
            }
        }
        Ok(log
            .events()
            .iter()
            .map(|event| {
                let Some(location) = event.location.as_deref() else {
                    return false;
                };
                let device = event.device_id.as_str();
                let share = per_pair[&(device, location)] as f64 / per_device[device] as f64;
                share < self.rarity_threshold
            })
            .collect())
    }
}
