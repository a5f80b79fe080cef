//! Device and location views of a flagged log.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::detect::FlaggedLog;
use crate::model::Flag;

/// Points per flagged event in [`DeviceScore::device_risk_score`].
pub const DEVICE_FLAGGED_WEIGHT: f64 = 2.0;
/// Points per distinct operator.
pub const DEVICE_OPERATOR_WEIGHT: f64 = 1.5;
/// Points per shared-key flag.
pub const DEVICE_SHARED_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceScore {
    #[serde(rename = "Device_ID")]
    pub device_id: String,
    #[serde(rename = "Total_Tests")]
    pub total_tests: usize,
    #[serde(rename = "Flagged_Events")]
    pub flagged_events: usize,
    #[serde(rename = "Distinct_Operators")]
    pub distinct_operators: usize,
    #[serde(rename = "SHARED_KEY")]
    pub shared_key_flags: usize,
    #[serde(rename = "Device_Risk_Score")]
    pub device_risk_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationActivity {
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Events")]
    pub events: usize,
    #[serde(rename = "Flagged_Events")]
    pub flagged_events: usize,
    #[serde(rename = "Distinct_Operators")]
    pub distinct_operators: usize,
    #[serde(rename = "Distinct_Devices")]
    pub distinct_devices: usize,
}

#[derive(Default)]
struct Tally<'a> {
    events: usize,
    flagged: usize,
    shared: usize,
    operators: HashSet<&'a str>,
    devices: HashSet<&'a str>,
}

/// Per-device totals, riskiest first; ties by device id.
pub fn device_scores(flagged: &FlaggedLog) -> Vec<DeviceScore> {
    let mut tallies: BTreeMap<&str, Tally<'_>> = BTreeMap::new();
    for (idx, (event, flags)) in flagged.iter().enumerate() {
        let tally = tallies.entry(event.device_id.as_str()).or_default();
        tally.events += 1;
        tally.flagged += usize::from(flagged.is_flagged(idx));
        tally.shared += usize::from(flags.get(Flag::SharedKey));
        tally.operators.insert(event.operator_id.as_str());
    }

    let mut scores: Vec<DeviceScore> = tallies
        .into_iter()
        .map(|(device_id, t)| DeviceScore {
            device_id: device_id.to_string(),
            total_tests: t.events,
            flagged_events: t.flagged,
            distinct_operators: t.operators.len(),
            shared_key_flags: t.shared,
            device_risk_score: DEVICE_FLAGGED_WEIGHT * t.flagged as f64
                + DEVICE_OPERATOR_WEIGHT * t.operators.len() as f64
                + DEVICE_SHARED_WEIGHT * t.shared as f64,
        })
        .collect();
    scores.sort_by(|a, b| {
        b.device_risk_score
            .total_cmp(&a.device_risk_score)
            .then_with(|| a.device_id.cmp(&b.device_id))
    });
    scores
}

/// Activity per location, ordered by location. Events without a location are
/// left out.
pub fn location_activity(flagged: &FlaggedLog) -> Vec<LocationActivity> {
    let mut tallies: BTreeMap<&str, Tally<'_>> = BTreeMap::new();
    for (idx, event) in flagged.log().events().iter().enumerate() {
        let Some(location) = event.location.as_deref() else {
            continue;
        };
        let tally = tallies.entry(location).or_default();
        tally.events += 1;
        tally.flagged += usize::from(flagged.is_flagged(idx));
        tally.operators.insert(event.operator_id.as_str());
        tally.devices.insert(event.device_id.as_str());
    }
    tallies
        .into_iter()
        .map(|(location, t)| LocationActivity {
            location: location.to_string(),
            events: t.events,
            flagged_events: t.flagged,
            distinct_operators: t.operators.len(),
            distinct_devices: t.devices.len(),
        })
        .collect()
}
