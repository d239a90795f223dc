//! Server bootstrap: wires the store, the peer link manager, and the
//! gossip engine together, then runs the accept loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::gossip::{GossipEngine, GossipSubmission};
use crate::peer::{PeerArrival, PeerLinkManager};
use crate::places::PlacesClient;
use crate::session::{self, SessionState};
use crate::store::LocationStore;

/// Depth of the queues feeding the gossip engine. Both session handlers and
/// the peer-arrival bridge publish into the same bounded channel; the
/// engine is its single consumer.
const GOSSIP_QUEUE_DEPTH: usize = 1024;
const PEER_ARRIVAL_QUEUE_DEPTH: usize = 1024;

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .with_context(|| format!("binding listener on {}", self.config.listen_addr))?;
        tracing::info!(
            server_id = %self.config.server_id,
            listen_addr = %self.config.listen_addr,
            neighbors = ?self.config.neighbors.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            "server starting"
        );

        let store = Arc::new(LocationStore::new());
        let peers = Arc::new(PeerLinkManager::new(&self.config));
        let gossip = Arc::new(GossipEngine::new(Arc::clone(&store), Arc::clone(&peers)));
        let places = Arc::new(PlacesClient::from_env());

        let (gossip_tx, gossip_rx) = mpsc::channel::<GossipSubmission>(GOSSIP_QUEUE_DEPTH);
        let (peer_tx, peer_rx) = mpsc::channel::<PeerArrival>(PEER_ARRIVAL_QUEUE_DEPTH);

        tokio::spawn(bridge_peer_arrivals(peer_rx, gossip_tx.clone()));
        tokio::spawn(run_gossip_consumer(Arc::clone(&gossip), gossip_rx));

        Arc::clone(&peers).start(peer_tx);

        let session_state = Arc::new(SessionState {
            server_id: self.config.server_id.as_str().to_string(),
            store,
            gossip_tx,
            places,
        });

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let state = Arc::clone(&session_state);
            tokio::spawn(async move {
                session::handle_connection(stream, peer_addr, state).await;
            });
        }
    }
}

/// Converts peer-link arrivals into gossip submissions, tagging each with
/// the neighbor it came from so the engine excludes that neighbor on
/// re-flood.
async fn bridge_peer_arrivals(
    mut peer_rx: mpsc::Receiver<PeerArrival>,
    gossip_tx: mpsc::Sender<GossipSubmission>,
) {
    while let Some(arrival) = peer_rx.recv().await {
        let submission = GossipSubmission {
            record: arrival.record,
            canonical_line: arrival.canonical_line,
            source: Some(arrival.source),
        };
        if gossip_tx.send(submission).await.is_err() {
            tracing::warn!("gossip queue closed, peer arrival dropped");
            return;
        }
    }
}

async fn run_gossip_consumer(
    engine: Arc<GossipEngine>,
    mut gossip_rx: mpsc::Receiver<GossipSubmission>,
) {
    while let Some(submission) = gossip_rx.recv().await {
        engine.submit(submission).await;
    }
}
