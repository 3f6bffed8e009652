//! Session identifier generation.
//!
//! The producer never builds ids itself; it asks the injected generator, so
//! tests and deployments can swap strategies without touching stream logic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::AppError;

/// Capability for minting opaque session ids.
pub trait SessionIdGenerator: Send + Sync {
    /// Produce a fresh id. Never reused within a process.
    fn next_id(&self) -> String;
}

/// Millisecond timestamp plus a process-wide sequence number.
///
/// Ids look like `1760860800123-7`. The sequence suffix keeps ids distinct
/// when several sessions open within the same millisecond.
#[derive(Debug, Default)]
pub struct TimestampIds {
    sequence: AtomicU64,
}

impl TimestampIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionIdGenerator for TimestampIds {
    fn next_id(&self) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", millis, seq)
    }
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl SessionIdGenerator for UuidIds {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Build a generator by name ("timestamp" or "uuid").
pub fn create_id_generator(name: &str) -> Result<Arc<dyn SessionIdGenerator>, AppError> {
    match name {
        "timestamp" => Ok(Arc::new(TimestampIds::new())),
        "uuid" => Ok(Arc::new(UuidIds)),
        other => Err(AppError::Config(format!(
            "Unknown id_generator: {}. Available: timestamp, uuid",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_timestamp_ids_unique_in_same_millisecond() {
        let ids = TimestampIds::new();
        let seen: HashSet<String> = (0..1000).map(|_| ids.next_id()).collect();
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_timestamp_id_shape() {
        let id = TimestampIds::new().next_id();
        let (millis, seq) = id.split_once('-').unwrap();
        assert!(millis.parse::<i64>().unwrap() > 0);
        assert_eq!(seq, "0");
    }

    #[test]
    fn test_uuid_ids_parse() {
        let id = UuidIds.next_id();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_ne!(id, UuidIds.next_id());
    }

    #[test]
    fn test_create_id_generator() {
        assert!(create_id_generator("timestamp").is_ok());
        assert!(create_id_generator("uuid").is_ok());
        assert!(create_id_generator("random").is_err());
    }
}
