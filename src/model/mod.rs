//! Event model: normalized entities, timestamp parsing and the event log arena.

pub mod event_log;
pub mod timestamp;
pub mod types;

pub use event_log::{Column, EventLog, GroupKey, Partition, RawTable};
pub use types::{
    Event, Flag, FlagCounts, FlagSet, FlaggedEvent, FlaggedRecord, OperatorScore, RiskLevel,
    Session,
};
