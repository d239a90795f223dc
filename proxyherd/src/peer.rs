//! Persistent inter-server connection manager.
//!
//! One outbound dial attempt per declared neighbor, with exponential
//! backoff, reset on every successful connect. Loops `connect → handle →
//! sleep backoff → connect` forever, one task per peer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;

use crate::codec::{self, Command};
use crate::config::{Neighbor, ServerConfig, ServerId, RETRY_FACTOR, RETRY_INITIAL, RETRY_MAX};

/// An `AT` record received over a peer link, tagged with the neighbor it
/// arrived from so the gossip engine can exclude that neighbor on re-flood.
pub struct PeerArrival {
    pub source: ServerId,
    pub record: codec::AtRecord,
    pub canonical_line: String,
}

/// Connection state of a single neighbor link, exposed for observability
/// and tests — the core algorithm only needs "is it connected".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Waiting,
}

struct PeerLink {
    addr: std::net::SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>,
    state: Mutex<LinkState>,
}

/// Maintains one persistent outbound link per neighbor in the topology.
pub struct PeerLinkManager {
    self_id: ServerId,
    links: HashMap<ServerId, PeerLink>,
}

impl PeerLinkManager {
    pub fn new(config: &ServerConfig) -> Self {
        let links = config
            .neighbors
            .iter()
            .map(|n: &Neighbor| {
                (
                    n.id.clone(),
                    PeerLink {
                        addr: n.addr,
                        writer: Mutex::new(None),
                        state: Mutex::new(LinkState::Disconnected),
                    },
                )
            })
            .collect();
        Self {
            self_id: config.server_id.clone(),
            links,
        }
    }

    pub fn neighbor_ids(&self) -> impl Iterator<Item = &ServerId> {
        self.links.keys()
    }

    pub fn state_of(&self, neighbor: &ServerId) -> Option<LinkState> {
        self.links.get(neighbor).map(|l| *l.state.lock())
    }

    /// All neighbors currently CONNECTED, except `exclude` — the flood
    /// fan-out set for one gossip step.
    pub fn connected_except(&self, exclude: Option<&ServerId>) -> Vec<ServerId> {
        self.links
            .iter()
            .filter(|(id, link)| {
                *link.state.lock() == LinkState::Connected && Some(*id) != exclude
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Best-effort send: succeeds iff the neighbor is CONNECTED and the
    /// write completes before any error. Never queues.
    pub async fn send(&self, neighbor: &ServerId, line: &str) -> bool {
        let Some(link) = self.links.get(neighbor) else {
            return false;
        };
        let Some(mut writer) = link.writer.lock().take() else {
            return false;
        };
        let payload = format!("{line}\n");
        match writer.write_all(payload.as_bytes()).await {
            Ok(()) => {
                *link.writer.lock() = Some(writer);
                true
            }
            Err(e) => {
                tracing::warn!(peer = %neighbor, "peer link write failed: {e}");
                *link.state.lock() = LinkState::Waiting;
                false
            }
        }
    }

    /// Spawn the reconnect-forever task for every declared neighbor.
    /// Lines received while CONNECTED are parsed as `AT` and forwarded to
    /// `arrivals`; non-`AT` lines are logged and dropped (peer protocol
    /// violation, §7).
    pub fn start(self: Arc<Self>, arrivals: mpsc::Sender<PeerArrival>) {
        for neighbor in self.links.keys().cloned().collect::<Vec<_>>() {
            let manager = Arc::clone(&self);
            let arrivals = arrivals.clone();
            tokio::spawn(async move {
                manager.run_link(neighbor, arrivals).await;
            });
        }
    }

    async fn run_link(&self, neighbor: ServerId, arrivals: mpsc::Sender<PeerArrival>) {
        let link = &self.links[&neighbor];
        let mut backoff = RETRY_INITIAL;

        loop {
            *link.state.lock() = LinkState::Connecting;
            match TcpStream::connect(link.addr).await {
                Ok(stream) => {
                    tracing::info!(peer = %neighbor, self_id = %self.self_id, "peer link connected");
                    *link.state.lock() = LinkState::Connected;
                    backoff = RETRY_INITIAL;

                    let (read_half, write_half) = stream.into_split();
                    *link.writer.lock() = Some(write_half);

                    self.read_until_disconnect(&neighbor, read_half, &arrivals)
                        .await;

                    *link.writer.lock() = None;
                    *link.state.lock() = LinkState::Waiting;
                    tracing::warn!(peer = %neighbor, "peer link dropped, will reconnect");
                }
                Err(e) => {
                    *link.state.lock() = LinkState::Waiting;
                    tracing::warn!(
                        peer = %neighbor,
                        backoff_secs = backoff.as_secs(),
                        "peer connect failed: {e}"
                    );
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * RETRY_FACTOR).min(RETRY_MAX);
            *link.state.lock() = LinkState::Disconnected;
        }
    }

    async fn read_until_disconnect(
        &self,
        neighbor: &ServerId,
        read_half: tokio::net::tcp::OwnedReadHalf,
        arrivals: &mpsc::Sender<PeerArrival>,
    ) {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match codec::parse_line(&line) {
                    Command::At(record) => {
                        if arrivals
                            .send(PeerArrival {
                                source: neighbor.clone(),
                                record,
                                canonical_line: line.clone(),
                            })
                            .await
                            .is_err()
                        {
                            tracing::warn!("gossip arrival queue closed");
                            return;
                        }
                    }
                    _ => {
                        tracing::warn!(peer = %neighbor, %line, "non-AT line from peer, ignored");
                    }
                },
                Ok(None) => {
                    tracing::info!(peer = %neighbor, "peer link EOF");
                    return;
                }
                Err(e) => {
                    tracing::warn!(peer = %neighbor, "peer link read error: {e}");
                    return;
                }
            }
        }
    }
}
