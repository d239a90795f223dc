//! The gossip engine: accept-and-flood decisions plus the seen-message
//! dedup set.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::AtRecord;
use crate::config::{ServerId, MAX_SEEN_MESSAGES};
use crate::peer::PeerLinkManager;
use crate::store::{LocationRecord, LocationStore};

/// `(origin_server, client_id, client_time)` — identifies one update
/// regardless of how many times it gets re-flooded.
type Fingerprint = (String, String, String);

/// Bounded set of fingerprints already processed. FIFO eviction once full;
/// per the design notes, evicting a fingerprint can at worst cause one
/// re-flood of a stale update, which the store's LWW check suppresses.
struct SeenSet {
    members: Mutex<(HashSet<Fingerprint>, VecDeque<Fingerprint>)>,
}

impl SeenSet {
    fn new() -> Self {
        Self {
            members: Mutex::new((HashSet::new(), VecDeque::new())),
        }
    }

    /// Returns `true` if `fp` was already present (a duplicate); otherwise
    /// inserts it and returns `false`, evicting the oldest entry if the
    /// set is now over capacity.
    fn check_and_insert(&self, fp: Fingerprint) -> bool {
        let mut guard = self.members.lock();
        let (set, order) = &mut *guard;
        if set.contains(&fp) {
            return true;
        }
        if set.len() >= MAX_SEEN_MESSAGES
            && let Some(oldest) = order.pop_front()
        {
            set.remove(&oldest);
        }
        set.insert(fp.clone());
        order.push_back(fp);
        false
    }
}

/// An `AT` record awaiting the gossip engine's accept-and-flood decision,
/// carrying the verbatim wire line it arrived as (or was formatted as, if
/// locally produced) so `canonical_line` stays byte-exact through the flood.
pub struct GossipSubmission {
    pub record: AtRecord,
    pub canonical_line: String,
    /// The neighbor this arrived from, if any. `None` for a locally
    /// produced `IAMAT` or for an `AT` received on a generic inbound
    /// socket whose peer identity we don't know — both are flooded to
    /// every connected neighbor.
    pub source: Option<ServerId>,
}

pub struct GossipEngine {
    store: Arc<LocationStore>,
    peers: Arc<PeerLinkManager>,
    seen: SeenSet,
}

impl GossipEngine {
    pub fn new(store: Arc<LocationStore>, peers: Arc<PeerLinkManager>) -> Self {
        Self {
            store,
            peers,
            seen: SeenSet::new(),
        }
    }

    pub fn store(&self) -> &LocationStore {
        &self.store
    }

    /// Dedup, insert, LWW-upsert, flood.
    pub async fn submit(&self, submission: GossipSubmission) {
        let GossipSubmission {
            record,
            canonical_line,
            source,
        } = submission;

        let fingerprint = (
            record.origin_server.clone(),
            record.client_id.clone(),
            record.client_time.clone(),
        );
        if self.seen.check_and_insert(fingerprint) {
            return;
        }

        let time_skew = parse_skew(&record.signed_skew);
        let accepted = self.store.upsert(LocationRecord {
            client_id: record.client_id.clone(),
            location: record.location.clone(),
            client_time: record.client_time.clone(),
            origin_server: record.origin_server.clone(),
            time_skew,
            canonical_line: canonical_line.clone(),
        });
        if !accepted {
            return;
        }

        let targets = self.peers.connected_except(source.as_ref());
        for neighbor in &targets {
            self.peers.send(neighbor, &canonical_line).await;
        }
        if !targets.is_empty() {
            tracing::info!(
                client_id = %record.client_id,
                neighbors = ?targets.iter().map(ServerId::as_str).collect::<Vec<_>>(),
                "location propagated"
            );
        }
    }
}

fn parse_skew(signed: &str) -> f64 {
    signed.parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn engine() -> GossipEngine {
        let store = Arc::new(LocationStore::new());
        let config = ServerConfig::resolve("Bailey".parse().unwrap());
        let peers = Arc::new(PeerLinkManager::new(&config));
        GossipEngine::new(store, peers)
    }

    fn submission(client_time: &str) -> GossipSubmission {
        let record = AtRecord {
            origin_server: "Bailey".into(),
            signed_skew: "+0.5".into(),
            client_id: "c".into(),
            location: "+1.0+1.0".into(),
            client_time: client_time.into(),
        };
        GossipSubmission {
            canonical_line: format!("AT Bailey +0.5 c +1.0+1.0 {client_time}"),
            record,
            source: None,
        }
    }

    #[tokio::test]
    async fn first_submission_lands_in_store() {
        let engine = engine();
        engine.submit(submission("100")).await;
        assert_eq!(engine.store().get("c").unwrap().client_time, "100");
    }

    #[tokio::test]
    async fn idempotent_flood_law() {
        let engine = engine();
        // Injecting the same IAMAT-derived fingerprint N times yields the
        // same final store contents as injecting it once.
        for _ in 0..5 {
            engine.submit(submission("100")).await;
        }
        assert_eq!(engine.store().get("c").unwrap().client_time, "100");
    }

    #[tokio::test]
    async fn strictly_newer_time_replaces_incumbent() {
        let engine = engine();
        engine.submit(submission("100")).await;
        engine.submit(submission("200")).await;
        assert_eq!(engine.store().get("c").unwrap().client_time, "200");
    }

    #[tokio::test]
    async fn older_time_does_not_replace_incumbent() {
        let engine = engine();
        engine.submit(submission("200")).await;
        engine.submit(submission("100")).await;
        assert_eq!(engine.store().get("c").unwrap().client_time, "200");
    }

    #[test]
    fn seen_set_evicts_when_over_capacity() {
        let seen = SeenSet::new();
        for i in 0..MAX_SEEN_MESSAGES {
            assert!(!seen.check_and_insert(("Bailey".into(), "c".into(), i.to_string())));
        }
        // The set is now exactly at capacity; one more insert evicts fingerprint 0.
        assert!(!seen.check_and_insert(("Bailey".into(), "c".into(), "fresh".into())));
        assert!(!seen.check_and_insert(("Bailey".into(), "c".into(), "0".into())));
    }
}
