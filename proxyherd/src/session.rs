//! Per-connection session handler.
//!
//! Does not distinguish client sockets from peer sockets at accept time —
//! any line on any accepted socket is dispatched the same way.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::codec::{self, Command};
use crate::gossip::GossipSubmission;
use crate::places::PlacesClient;
use crate::store::LocationStore;

/// Everything a session needs to dispatch a command.
pub struct SessionState {
    pub server_id: String,
    pub store: Arc<LocationStore>,
    pub gossip_tx: mpsc::Sender<GossipSubmission>,
    pub places: Arc<PlacesClient>,
}

/// Drive one accepted connection until EOF or a write failure.
pub async fn handle_connection(stream: TcpStream, peer_addr: std::net::SocketAddr, state: Arc<SessionState>) {
    tracing::info!(%peer_addr, "client connected");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(%peer_addr, "read error: {e}");
                break;
            }
        };
        tracing::info!(%peer_addr, %line, "command received");

        let Some(reply) = dispatch(&line, &state).await else {
            continue;
        };
        tracing::info!(%peer_addr, response_len = reply.len(), "command processed");
        if write_half.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
    tracing::info!(%peer_addr, "client disconnected");
}

/// Returns the bytes to write back to the socket, or `None` when nothing
/// should be sent (an `AT` arriving on a generic inbound socket has no reply).
async fn dispatch(line: &str, state: &SessionState) -> Option<String> {
    match codec::parse_line(line) {
        Command::IAmAt {
            client_id,
            location,
            client_time,
        } => Some(handle_iamat(state, client_id, location, client_time).await),
        Command::WhatsAt {
            client_id,
            radius_km,
            max_results,
        } => Some(handle_whatsat(state, line, client_id, radius_km, max_results).await),
        Command::At(record) => {
            handle_peer_at(state, line, record).await;
            None
        }
        Command::Malformed => Some(format!("{}\n", codec::format_error_reply(line))),
    }
}

async fn handle_iamat(
    state: &SessionState,
    client_id: String,
    location: String,
    client_time: String,
) -> String {
    let server_time = now_secs();
    let client_secs: f64 = client_time.parse().unwrap_or(0.0);
    let skew = server_time - client_secs;

    let canonical_line = codec::format_at_line(
        &state.server_id,
        skew,
        &client_id,
        &location,
        &client_time,
    );

    let record = codec::AtRecord {
        origin_server: state.server_id.clone(),
        signed_skew: codec::format_signed_skew(skew),
        client_id,
        location,
        client_time,
    };
    let submission = GossipSubmission {
        record,
        canonical_line: canonical_line.clone(),
        source: None,
    };
    if state.gossip_tx.send(submission).await.is_err() {
        tracing::warn!("gossip queue closed, location not propagated");
    }

    format!("{canonical_line}\n")
}

async fn handle_whatsat(
    state: &SessionState,
    original_line: &str,
    client_id: String,
    radius_km: u32,
    max_results: u32,
) -> String {
    let Some(record) = state.store.get(&client_id) else {
        return format!("{}\n", codec::format_error_reply(original_line));
    };

    let Some((lat, lon)) = parse_location(&record.location) else {
        return format!("{}\n", codec::format_error_reply(original_line));
    };

    tracing::info!(latitude = lat, longitude = lon, radius_km, "places api request");
    let places_json = state
        .places
        .lookup(lat, lon, radius_km, max_results)
        .await;

    format!("{}\n{places_json}\n\n", record.canonical_line)
}

async fn handle_peer_at(state: &SessionState, original_line: &str, record: codec::AtRecord) {
    let submission = GossipSubmission {
        record,
        canonical_line: original_line.to_string(),
        source: None,
    };
    if state.gossip_tx.send(submission).await.is_err() {
        tracing::warn!("gossip queue closed, AT record dropped");
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// `^[+-]\d+\.\d+[+-]\d+\.\d+$` split into (lat, lon) — the location string
/// is already validated by the codec by the time it reaches the store.
fn parse_location(location: &str) -> Option<(f64, f64)> {
    let split = location
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '+' || *c == '-')
        .map(|(i, _)| i)?;
    let (lat, lon) = location.split_at(split);
    Some((lat.parse().ok()?, lon.parse().ok()?))
}
