//! Static server identity, port table, neighbor topology, and protocol
//! constants. The core treats all of this as an injected external
//! collaborator; this module is that collaborator's concrete,
//! compiled-in implementation.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use clap::Parser;

/// Maximum radius accepted by `WHATSAT`, in kilometers.
pub const MAX_RADIUS_KM: u32 = 50;
/// Maximum result count accepted by `WHATSAT`.
pub const MAX_INFO_LIMIT: u32 = 20;
/// Upper bound on the gossip engine's seen-message set.
pub const MAX_SEEN_MESSAGES: usize = 1000;

/// Exponential backoff schedule for the peer link manager.
pub const RETRY_INITIAL: std::time::Duration = std::time::Duration::from_secs(1);
pub const RETRY_MAX: std::time::Duration = std::time::Duration::from_secs(60);
pub const RETRY_FACTOR: u32 = 2;

const HOST: &str = "127.0.0.1";

/// The five servers in the herd, in the order `config.py` declared them.
const SERVER_IDS: &[&str] = &["Bailey", "Bona", "Campbell", "Clark", "Jaquez"];

fn port_for(id: &str) -> Option<u16> {
    match id {
        "Bailey" => Some(12027),
        "Bona" => Some(12058),
        "Campbell" => Some(12089),
        "Clark" => Some(12120),
        "Jaquez" => Some(12151),
        _ => None,
    }
}

/// Neighbors of `id`, derived from the undirected graph:
/// Clark—{Jaquez,Bona}, Campbell—{Bailey,Bona,Jaquez}, Bona—{Bailey,Clark,Campbell}.
fn neighbors_of(id: &str) -> &'static [&'static str] {
    match id {
        "Clark" => &["Jaquez", "Bona"],
        "Campbell" => &["Bailey", "Bona", "Jaquez"],
        "Bona" => &["Bailey", "Clark", "Campbell"],
        "Bailey" => &["Bona", "Campbell"],
        "Jaquez" => &["Clark", "Campbell"],
        _ => &[],
    }
}

/// One of the five fixed herd members. Validated on construction — there
/// is no way to hold a `ServerId` that isn't in `SERVER_IDS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerId(String);

impl ServerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn all() -> impl Iterator<Item = ServerId> {
        SERVER_IDS.iter().map(|s| ServerId(s.to_string()))
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if SERVER_IDS.contains(&s) {
            Ok(ServerId(s.to_string()))
        } else {
            Err(format!(
                "unknown server id {s:?}; valid ids are: {}",
                SERVER_IDS.join(", ")
            ))
        }
    }
}

/// `<program> <SERVER_ID>` — no other flags.
#[derive(Debug, Parser)]
#[command(name = "proxyherd", about = "Location-proxy herd server")]
pub struct Cli {
    /// Which herd member this process is.
    pub server_id: ServerId,
}

/// Fully resolved configuration for one running server: its own identity,
/// listen address, and the neighbors its Peer Link Manager should dial.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_id: ServerId,
    pub listen_addr: SocketAddr,
    pub neighbors: Vec<Neighbor>,
}

/// A declared neighbor: its id and the address to dial it at.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub id: ServerId,
    pub addr: SocketAddr,
}

impl ServerConfig {
    pub fn resolve(server_id: ServerId) -> Self {
        let port = port_for(server_id.as_str()).expect("validated ServerId always has a port");
        let listen_addr = format!("{HOST}:{port}")
            .parse()
            .expect("static host/port always parses");

        let neighbors = neighbors_of(server_id.as_str())
            .iter()
            .map(|&name| {
                let port = port_for(name).expect("topology only names known servers");
                Neighbor {
                    id: ServerId(name.to_string()),
                    addr: format!("{HOST}:{port}").parse().expect("static addr"),
                }
            })
            .collect();

        Self {
            server_id,
            listen_addr,
            neighbors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_server_id() {
        assert!("Nowhere".parse::<ServerId>().is_err());
    }

    #[test]
    fn accepts_known_server_id() {
        let id: ServerId = "Bona".parse().unwrap();
        assert_eq!(id.as_str(), "Bona");
    }

    #[test]
    fn topology_is_symmetric() {
        for id in SERVER_IDS {
            for neighbor in neighbors_of(id) {
                assert!(
                    neighbors_of(neighbor).contains(id),
                    "{id} lists {neighbor} but not vice versa"
                );
            }
        }
    }

    #[test]
    fn clark_neighbors_are_jaquez_and_bona() {
        let cfg = ServerConfig::resolve("Clark".parse().unwrap());
        let names: Vec<&str> = cfg.neighbors.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(names, vec!["Jaquez", "Bona"]);
    }
}
