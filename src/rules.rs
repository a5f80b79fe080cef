//! Custom rules run after the built-in detectors.
//!
//! A rule looks at the whole [`EventLog`] and returns labelled
//! [`FlaggedRecord`]s. Rules are registered at run time as trait objects or
//! closures. A failing rule (error or panic) is reported as a
//! [`RuleFailure`] and never takes the other rules' results down with it.

use std::panic::{self, AssertUnwindSafe};

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{debug, warn};

use crate::bucketing::epoch_millis;
use crate::config::DetectorConfig;
use crate::detect::{secs_to_millis, sliding_distinct};
use crate::model::{EventLog, FlaggedRecord, GroupKey};

pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, log: &EventLog) -> Result<Vec<FlaggedRecord>>;
}

struct FnRule<F> {
    name: String,
    f: F,
}

impl<F> Rule for FnRule<F>
where
    F: Fn(&EventLog) -> Result<Vec<FlaggedRecord>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, log: &EventLog) -> Result<Vec<FlaggedRecord>> {
        (self.f)(log)
    }
}

/// A rule that failed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    pub rule: String,
    pub message: String,
}

/// Records from every rule that succeeded, plus the failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleOutcome {
    pub records: Vec<FlaggedRecord>,
    pub failures: Vec<RuleFailure>,
}

#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Box<dyn Rule>>,
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the legacy "Shared barcode" and "Rapid succession"
    /// rules, parameterized from the detector settings.
    pub fn legacy(config: &DetectorConfig) -> Self {
        let mut registry = Self::new();
        registry.register(SharedBarcodeRule {
            window_minutes: config.sharing.window_minutes,
            share_threshold: config.sharing.share_threshold,
        });
        registry.register(RapidSuccessionRule {
            threshold_secs: config.rapid.threshold_secs,
        });
        registry
    }

    pub fn register(&mut self, rule: impl Rule + 'static) -> &mut Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&EventLog) -> Result<Vec<FlaggedRecord>> + Send + Sync + 'static,
    {
        self.register(FnRule {
            name: name.into(),
            f,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule in registration order.
    pub fn apply_all(&self, log: &EventLog) -> RuleOutcome {
        let mut outcome = RuleOutcome::default();
        for rule in &self.rules {
            let result = panic::catch_unwind(AssertUnwindSafe(|| rule.apply(log)));
            let message = match result {
                Ok(Ok(records)) => {
                    debug!(rule = rule.name(), records = records.len(), "Rule finished");
                    outcome.records.extend(records);
                    continue;
                }
                Ok(Err(err)) => format!("{err:#}"),
                Err(payload) => panic_message(&*payload),
            };
            warn!(rule = rule.name(), error = %message, "Rule failed");
            outcome.failures.push(RuleFailure {
                rule: rule.name().to_string(),
                message,
            });
        }
        outcome
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Legacy rules
// ---------------------------------------------------------------------------

/// A barcode scanned by at least `share_threshold` operators within
/// `window_minutes` either side of an event.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedBarcodeRule {
    pub window_minutes: f64,
    pub share_threshold: usize,
}

impl Rule for SharedBarcodeRule {
    fn name(&self) -> &str {
        "Shared barcode"
    }

    fn apply(&self, log: &EventLog) -> Result<Vec<FlaggedRecord>> {
        if !self.window_minutes.is_finite() || self.window_minutes <= 0.0 {
            bail!("window must be positive, got {} minutes", self.window_minutes);
        }
        let window = secs_to_millis(self.window_minutes * 60.0);
        let mut records = Vec::new();
        for partition in log.partition(GroupKey::Barcode) {
            let counts =
                sliding_distinct(log, &partition.indices, GroupKey::Operator, window, window);
            for (&idx, n) in partition.indices.iter().zip(counts) {
                if n >= self.share_threshold {
                    records.push(
                        FlaggedRecord::new(log.events()[idx].event_id, self.name())
                            .with_detail(format!("operators_in_window={n}")),
                    );
                }
            }
        }
        Ok(records)
    }
}

/// A barcode scanned again less than `threshold_secs` after its previous scan.
#[derive(Debug, Clone, PartialEq)]
pub struct RapidSuccessionRule {
    pub threshold_secs: f64,
}

impl Rule for RapidSuccessionRule {
    fn name(&self) -> &str {
        "Rapid succession"
    }

    fn apply(&self, log: &EventLog) -> Result<Vec<FlaggedRecord>> {
        if !self.threshold_secs.is_finite() || self.threshold_secs < 0.0 {
            bail!("threshold must be non-negative, got {}", self.threshold_secs);
        }
        let threshold_ms = secs_to_millis(self.threshold_secs);
        let events = log.events();
        let mut records = Vec::new();
        for partition in log.partition(GroupKey::Barcode) {
            for pair in partition.indices.windows(2) {
                let gap = epoch_millis(&events[pair[1]].timestamp)
                    - epoch_millis(&events[pair[0]].timestamp);
                if gap < threshold_ms {
                    let event = &events[pair[1]];
                    records.push(
                        FlaggedRecord::new(event.event_id, self.name())
                            .with_detail(format!("gap_secs={}", gap as f64 / 1000.0)),
                    );
                }
            }
        }
        Ok(records)
    }
}
