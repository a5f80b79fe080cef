//! End-to-end analysis pass.
//!
//! raw rows → [`EventLog`] → detectors (parallel) → rules → [`FlaggedLog`]
//! → scores, sessions and breakdowns.

use serde::Serialize;
use tracing::{info, info_span};

use crate::config::AuditConfig;
use crate::detect::{Detector, FlaggedLog, builtin_detectors, run_detectors};
use crate::error::EngineResult;
use crate::model::{EventLog, Flag, FlaggedEvent, FlaggedRecord, OperatorScore, RawTable, Session};
use crate::rules::{RuleFailure, RuleRegistry};
use crate::scoring::breakdown::{DeviceScore, LocationActivity, device_scores, location_activity};
use crate::scoring::{aggregate, strategy_from_config};
use crate::session::cluster;

/// Everything one pass produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub strategy: String,
    pub flagged_events: Vec<FlaggedEvent>,
    pub records: Vec<FlaggedRecord>,
    pub operator_scores: Vec<OperatorScore>,
    pub sessions: Vec<Session>,
    pub device_scores: Vec<DeviceScore>,
    pub locations: Vec<LocationActivity>,
    pub rule_failures: Vec<RuleFailure>,
}

impl AnalysisReport {
    pub fn flagged_count(&self) -> usize {
        self.flagged_events.iter().filter(|e| e.is_flagged()).count()
    }
}

/// A configured engine: detector settings, scoring strategy and rules.
#[derive(Debug)]
pub struct Engine {
    config: AuditConfig,
    rules: RuleRegistry,
}

impl Engine {
    /// An engine with the legacy rules registered when the configuration
    /// asks for them.
    pub fn new(config: AuditConfig) -> Self {
        let rules = if config.rules.legacy {
            RuleRegistry::legacy(&config.detectors)
        } else {
            RuleRegistry::new()
        };
        Self { config, rules }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn rules_mut(&mut self) -> &mut RuleRegistry {
        &mut self.rules
    }

    pub fn run(&self, table: &RawTable) -> EngineResult<AnalysisReport> {
        let log = EventLog::build(table)?;
        self.run_log(log)
    }

    pub fn run_log(&self, log: EventLog) -> EngineResult<AnalysisReport> {
        let span = info_span!("analysis", events = log.len());
        let _guard = span.enter();

        let detectors = builtin_detectors(&self.config.detectors);
        let enabled: Vec<Flag> = detectors.iter().map(|d| d.flag()).collect();
        let (flagged, rule_failures) =
            run_detectors(log, &detectors)?.apply_rules(&self.rules);
        let report = self.summarize(&flagged, &enabled, rule_failures)?;

        info!(
            flagged = report.flagged_count(),
            records = report.records.len(),
            operators = report.operator_scores.len(),
            sessions = report.sessions.len(),
            rule_failures = report.rule_failures.len(),
            "Analysis complete"
        );
        Ok(report)
    }

    fn summarize(
        &self,
        flagged: &FlaggedLog,
        enabled: &[Flag],
        rule_failures: Vec<RuleFailure>,
    ) -> EngineResult<AnalysisReport> {
        let strategy = strategy_from_config(&self.config.scoring, enabled);
        Ok(AnalysisReport {
            strategy: strategy.name().to_string(),
            flagged_events: flagged.rows(),
            records: flagged.records().to_vec(),
            operator_scores: aggregate(flagged, strategy.as_ref()),
            sessions: cluster(flagged, &self.config.sessions)?,
            device_scores: device_scores(flagged),
            locations: location_activity(flagged),
            rule_failures,
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(AuditConfig::default())
    }
}
