mod util;

use poct_audit::config::{AuditConfig, DetectorConfig, KeyField};
use poct_audit::detect::{builtin_detectors, run_detectors};
use poct_audit::model::{Flag, GroupKey};
use poct_audit::pipeline::Engine;
use poct_audit::{DetectedLog, EngineError};
use util::{LogFixture, TestTracing};

fn run(fixture: &LogFixture, config: &DetectorConfig) -> DetectedLog {
    run_detectors(fixture.log(), &builtin_detectors(config)).expect("detectors run")
}

fn ids_with(flagged: &DetectedLog, flag: Flag) -> Vec<u64> {
    flagged
        .iter()
        .filter(|(_, flags)| flags.get(flag))
        .map(|(event, _)| event.event_id)
        .collect()
}

#[test]
fn rapid_succession_threshold_decides() {
    let fixture = LogFixture::new()
        .test("2025-06-01 09:00:00", "OP1", "D1")
        .test("2025-06-01 09:00:30", "OP1", "D1");

    let flagged = run(&fixture, &DetectorConfig::default());
    assert_eq!(ids_with(&flagged, Flag::Rapid), vec![2]);

    let mut strict = DetectorConfig::default();
    strict.rapid.threshold_secs = 20.0;
    let flagged = run(&fixture, &strict);
    assert!(ids_with(&flagged, Flag::Rapid).is_empty());
}

#[test]
fn mixed_offsets_compare_absolute_instants() {
    let fixture = LogFixture::new()
        .test("2025-06-01T09:00:00+00:00", "OP1", "D1")
        .test("2025-06-01T09:00:30+10:00", "OP1", "D1");
    let flagged = run(&fixture, &DetectorConfig::default());
    assert!(ids_with(&flagged, Flag::Rapid).is_empty());

    let log = fixture.log();
    let partitions = log.partition(GroupKey::Operator);
    let order: Vec<u64> = partitions[0]
        .indices
        .iter()
        .map(|&i| log.events()[i].event_id)
        .collect();
    assert_eq!(order, vec![2, 1]);
}

#[test]
fn dst_fall_back_orders_by_instant() {
    // Local 02:50 before the change is earlier than local 02:10 after it.
    let fixture = LogFixture::new()
        .test("2025-10-26T02:10:00+01:00", "OP1", "D1")
        .test("2025-10-26T02:50:00+02:00", "OP1", "D1");
    let log = fixture.log();
    let partitions = log.partition(GroupKey::Operator);
    let order: Vec<u64> = partitions[0]
        .indices
        .iter()
        .map(|&i| log.events()[i].event_id)
        .collect();
    assert_eq!(order, vec![2, 1]);

    let mut config = DetectorConfig::default();
    config.rapid.threshold_secs = 30.0 * 60.0;
    assert_eq!(ids_with(&run(&fixture, &config), Flag::Rapid), vec![1]);
}

#[test]
fn shift_rules_read_the_local_clock() {
    // 23:30+10:00 is 13:30 UTC, inside the default 06-22 shift on the UTC clock
    // but outside it locally.
    let fixture = LogFixture::new()
        .test("2025-06-01T23:30:00+10:00", "OP1", "D1")
        .test("2025-06-01T13:30:00+00:00", "OP2", "D2");
    let flagged = run(&fixture, &DetectorConfig::default());
    assert_eq!(ids_with(&flagged, Flag::ShiftViolation), vec![1]);
}

#[test]
fn shared_barcode_flags_depend_on_threshold() {
    let fixture = LogFixture::new()
        .scan("2025-06-01 09:00:00", "OP1", "D1", "B1")
        .scan("2025-06-01 09:02:00", "OP2", "D2", "B1")
        .scan("2025-06-01 09:04:00", "OP3", "D3", "B1");

    let flagged = run(&fixture, &DetectorConfig::default());
    assert_eq!(ids_with(&flagged, Flag::SharedKey), vec![1, 2, 3]);

    let mut four = DetectorConfig::default();
    four.sharing.share_threshold = 4;
    let flagged = run(&fixture, &four);
    assert!(ids_with(&flagged, Flag::SharedKey).is_empty());
}

#[test]
fn sharing_key_can_be_the_device() {
    let fixture = LogFixture::new()
        .test("2025-06-01 09:00:00", "OP1", "D1")
        .test("2025-06-01 09:01:00", "OP2", "D1")
        .test("2025-06-01 09:02:00", "OP3", "D1");
    let mut config = DetectorConfig::default();
    config.sharing.key = KeyField::Device;
    assert_eq!(config.sharing.key.group_key(), GroupKey::Device);
    let flagged = run(&fixture, &config);
    assert_eq!(ids_with(&flagged, Flag::SharedKey), vec![1, 2, 3]);
}

#[test]
fn disabled_detectors_leave_their_column_false() {
    let fixture = LogFixture::new()
        .test("2025-06-01 09:00:00", "OP1", "D1")
        .test("2025-06-01 09:00:01", "OP1", "D1");
    let mut config = DetectorConfig::default();
    config.disabled = vec![Flag::Rapid];
    let flagged = run(&fixture, &config);
    assert!(ids_with(&flagged, Flag::Rapid).is_empty());
}

#[test]
fn invalid_detector_parameters_abort_the_pass() {
    let mut config = AuditConfig::default();
    config.detectors.hopping.window_minutes = -1.0;
    let fixture = LogFixture::new().test("2025-06-01 09:00:00", "OP1", "D1");
    let err = Engine::new(config).run(&fixture.table()).unwrap_err();
    assert!(matches!(err, EngineError::Detector { detector: "DEVICE_HOP", .. }));
}

#[test]
fn detector_progress_is_logged() {
    let tracing = TestTracing::new();
    let _guard = tracing.install();
    let fixture = LogFixture::new()
        .test("2025-06-01 09:00:00", "OP1", "D1")
        .test("2025-06-01 09:00:30", "OP1", "D1");
    Engine::default().run(&fixture.table()).unwrap();
    tracing.assert_contains("Event log built");
    tracing.assert_contains("Analysis complete");
}

#[test]
fn operator_in_two_wards_is_flagged() {
    let fixture = LogFixture::new()
        .row("2025-06-01 08:40:00", "OP002", "ABL90_01", "", "ICU")
        .row("2025-06-01 08:45:00", "OP002", "ABL90_02", "", "Ward1")
        .row("2025-06-01 08:45:00", "OP003", "ABL90_01", "", "ICU")
        .row("2025-06-01 08:45:00", "OP003", "ABL90_02", "", "ICU");
    let flagged = run(&fixture, &DetectorConfig::default());
    assert_eq!(ids_with(&flagged, Flag::LocConflict), vec![2]);
    assert_eq!(ids_with(&flagged, Flag::CoLocation), vec![3, 4]);
}
