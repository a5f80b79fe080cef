//! Session clustering.
//!
//! A session is every event sharing one key value (barcode by default)
//! whose timestamp floors to the same fixed-width bucket. Sessions come out
//! ordered by key, then by bucket.

use std::collections::HashSet;

use itertools::Itertools;
use tracing::debug;

use crate::bucketing::{bucket_id, bucket_start, format_wall_clock};
use crate::config::SessionConfig;
use crate::detect::FlaggedLog;
use crate::error::{EngineError, EngineResult};
use crate::model::Session;

/// Group the flagged log into sessions. Events without the key are not part
/// of any session. Buckets floor the absolute instant and session ids carry
/// the bucket start in UTC.
pub fn cluster(flagged: &FlaggedLog, config: &SessionConfig) -> EngineResult<Vec<Session>> {
    if config.bucket_minutes == 0 {
        return Err(EngineError::Detector {
            detector: "SESSION",
            reason: "bucket width must be at least one minute".to_string(),
        });
    }
    let log = flagged.log();
    let events = log.events();
    let key = config.key.group_key();
    let width_secs = i64::from(config.bucket_minutes) * 60;

    let mut sessions = Vec::new();
    for partition in log.partition(key) {
        let chunks = partition
            .indices
            .iter()
            .chunk_by(|&&i| bucket_id(&events[i].timestamp, width_secs));
        for (bucket, members) in &chunks {
            let members: Vec<usize> = members.copied().collect();
            let (Some(&first), Some(&last)) = (members.first(), members.last()) else {
                continue;
            };
            let label = bucket_start(bucket, width_secs)
                .map(|ts| format_wall_clock(&ts))
                .unwrap_or_else(|| bucket.to_string());
            let operators: HashSet<&str> = members
                .iter()
                .map(|&i| events[i].operator_id.as_str())
                .collect();
            sessions.push(Session {
                session_id: format!("{}_{}", partition.key, label),
                start: events[first].timestamp,
                end: events[last].timestamp,
                event_count: members.len(),
                distinct_operators: operators.len(),
                representative_key: partition.key.to_string(),
                flagged_events: members
                    .iter()
                    .filter(|&&i| flagged.is_flagged(i))
                    .count(),
                event_ids: members.iter().map(|&i| events[i].event_id).collect(),
            });
        }
    }
    debug!(key = %config.key, sessions = sessions.len(), "Sessions clustered");
    Ok(sessions)
}
