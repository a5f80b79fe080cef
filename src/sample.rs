//! Deterministic demo dataset with planted anomalies.
//!
//! Regular traffic rotates three operators over two analyzers in two wards,
//! one test every ten minutes from 2025-06-01 08:00. On top of that the
//! generator plants:
//!
//! - a ward jump: row 5 repeats row 4's operator five minutes later on the
//!   other analyzer in the other ward
//! - a co-location: the first operator recorded on both analyzers at once
//! - a shared barcode burst: three operators scanning one barcode in two minutes
//! - an off-hours test late in the evening

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::model::{Column, RawTable};

const OPERATORS: [&str; 3] = ["OP001", "OP002", "OP003"];
const DEVICES: [&str; 2] = ["ABL90_01", "ABL90_02"];
const LOCATIONS: [&str; 2] = ["ICU", "Ward1"];
const TEST_TYPE: &str = "Glucose";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Default number of regular rows.
pub const DEFAULT_ROWS: usize = 20;

/// Barcode scanned by every operator in the planted burst.
pub const BURST_BARCODE: &str = "PT9999";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleRow {
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Operator_ID")]
    pub operator_id: String,
    #[serde(rename = "Device_ID")]
    pub device_id: String,
    #[serde(rename = "Barcode")]
    pub barcode: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Test_Type")]
    pub test_type: String,
}

impl SampleRow {
    fn new(ts: NaiveDateTime, operator: &str, device: &str, barcode: &str, location: &str) -> Self {
        Self {
            timestamp: ts.format(TIMESTAMP_FORMAT).to_string(),
            operator_id: operator.to_string(),
            device_id: device.to_string(),
            barcode: barcode.to_string(),
            location: location.to_string(),
            test_type: TEST_TYPE.to_string(),
        }
    }
}

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 1)
        .and_then(|d| d.and_hms_opt(8, 0, 0))
        .unwrap_or_default()
}

/// `rows` regular rows followed by the co-location, burst and off-hours rows.
pub fn generate(rows: usize) -> Vec<SampleRow> {
    let start = start();
    let mut out: Vec<SampleRow> = (0..rows)
        .map(|i| {
            SampleRow::new(
                start + Duration::minutes(10 * i as i64),
                OPERATORS[i % OPERATORS.len()],
                DEVICES[i % DEVICES.len()],
                &format!("PT{:04}", i + 1),
                LOCATIONS[i % LOCATIONS.len()],
            )
        })
        .collect();

    if rows > 5 {
        let base = &out[4];
        let jumped = SampleRow::new(
            start + Duration::minutes(45),
            &base.operator_id,
            DEVICES[1],
            &base.barcode,
            LOCATIONS[1],
        );
        out[5] = jumped;
    }

    out.push(SampleRow::new(start, OPERATORS[0], DEVICES[1], "PT0000", LOCATIONS[0]));

    let burst = start + Duration::hours(1) + Duration::minutes(5);
    for (i, operator) in OPERATORS.iter().enumerate() {
        out.push(SampleRow::new(
            burst + Duration::minutes(i as i64),
            operator,
            DEVICES[0],
            BURST_BARCODE,
            LOCATIONS[0],
        ));
    }

    let late = start + Duration::hours(15) + Duration::minutes(30);
    out.push(SampleRow::new(late, OPERATORS[1], DEVICES[0], "PT8888", LOCATIONS[1]));
    out
}

/// The rows as the tabular input the engine consumes.
pub fn to_table(rows: &[SampleRow]) -> RawTable {
    let columns = [
        Column::Timestamp,
        Column::OperatorId,
        Column::DeviceId,
        Column::Barcode,
        Column::Location,
        Column::TestType,
    ];
    let mut table = RawTable::new(columns.iter().map(|c| c.name().to_string()).collect());
    table.header_lines = 0;
    for row in rows {
        table.push_row(columns.iter().map(|c| c.name()).zip([
            row.timestamp.as_str(),
            row.operator_id.as_str(),
            row.device_id.as_str(),
            row.barcode.as_str(),
            row.location.as_str(),
            row.test_type.as_str(),
        ]));
    }
    table
}
