//! Misuse detection and operator risk scoring for point-of-care test device
//! logs.
//!
//! A pass turns raw rows into an [`EventLog`], runs the built-in detectors in
//! parallel, runs any registered [`Rule`]s over the same log and then reduces
//! the resulting [`FlaggedLog`] to operator scores, sessions and
//! device/location breakdowns. [`Engine`] wires the whole pass from an [`AuditConfig`].

pub mod bucketing;
pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod query;
pub mod rules;
pub mod sample;
pub mod scoring;
pub mod session;
pub mod stats;

pub use cli::{Cli, CliError, Commands};
pub use config::{AuditConfig, ConfigError};
pub use detect::{DetectedLog, Detector, FlaggedLog, builtin_detectors, run_detectors};
pub use error::{EngineError, EngineResult};
pub use model::{
    Event, EventLog, Flag, FlagSet, FlaggedEvent, FlaggedRecord, OperatorScore, RawTable,
    RiskLevel, Session,
};
pub use pipeline::{AnalysisReport, Engine};
pub use query::{DateRange, FilterCriteria, filter_events, filter_records};
pub use rules::{Rule, RuleFailure, RuleRegistry};
pub use scoring::{ScoringStrategy, aggregate};
pub use session::cluster;
