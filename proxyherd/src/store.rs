//! The replicated last-writer-wins client-location store.
//!
//! A single explicit value injected into each session handler — no
//! process-wide singleton.

use std::collections::HashMap;

use parking_lot::RwLock;

/// The canonical per-client entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    pub client_id: String,
    pub location: String,
    pub client_time: String,
    pub origin_server: String,
    pub time_skew: f64,
    pub canonical_line: String,
}

impl LocationRecord {
    /// `client_time` compared as a decimal number, per the LWW rule.
    fn client_time_value(&self) -> f64 {
        self.client_time.parse().unwrap_or(f64::NEG_INFINITY)
    }
}

/// Process-wide mapping from client id to its latest known location.
pub struct LocationStore {
    records: RwLock<HashMap<String, LocationRecord>>,
}

impl LocationStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, client_id: &str) -> Option<LocationRecord> {
        self.records.read().get(client_id).cloned()
    }

    /// Accepts iff there is no existing record, or the new `client_time`
    /// strictly exceeds the incumbent's. Ties keep the incumbent. The
    /// whole check-and-replace happens under one write lock, so no
    /// reader ever observes a half-built record.
    pub fn upsert(&self, record: LocationRecord) -> bool {
        let mut records = self.records.write();
        let accept = match records.get(&record.client_id) {
            None => true,
            Some(incumbent) => record.client_time_value() > incumbent.client_time_value(),
        };
        if accept {
            records.insert(record.client_id.clone(), record);
        }
        accept
    }
}

impl Default for LocationStore {
    fn default() -> Self {
        Self::new()
    }
}
