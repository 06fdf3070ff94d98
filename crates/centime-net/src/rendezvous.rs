//! Peer discovery over the BitTorrent mainline DHT.
//!
//! Everyone sharing the rendezvous secret announces against the same
//! info-hash (SHA-1 of the secret) and looks the hash up in a loop. The
//! resulting address stream is unbounded, repeats itself freely and may
//! contain our own address; the consumer deduplicates.

use std::net::SocketAddr;
use std::time::Duration;

use mainline::{Dht, Id};
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;

use centime_shared::constants::ANNOUNCE_INTERVAL_SECS;

use crate::error::{NetError, Result};

/// The 160-bit venue everyone sharing `secret` meets at.
pub fn info_hash_for(secret: &str) -> [u8; 20] {
    Sha1::digest(secret.as_bytes()).into()
}

pub struct Rendezvous {
    venue: String,
    port: u16,
}

impl Rendezvous {
    /// Bind the DHT client to the given UDP port, join the swarm, start
    /// the announce loop, and return the discovered-peer stream.
    pub fn start(secret: &str, port: u16) -> Result<(Self, mpsc::Receiver<SocketAddr>)> {
        let digest = info_hash_for(secret);
        let info_hash =
            Id::from_bytes(digest).map_err(|e| NetError::Rendezvous(e.to_string()))?;
        let venue = hex::encode(digest);

        let dht = Dht::builder()
            .port(port)
            .server()
            .build()
            .map_err(|e| NetError::Rendezvous(e.to_string()))?;

        tracing::info!(venue = %venue, port, "joined the DHT, meeting friends at the venue");

        let announcer = dht.clone();
        tokio::task::spawn_blocking(move || loop {
            if let Err(e) = announcer.announce_peer(info_hash, Some(port)) {
                tracing::warn!(error = %e, "DHT announce failed");
            }
            std::thread::sleep(Duration::from_secs(ANNOUNCE_INTERVAL_SECS));
        });

        let (tx, rx) = mpsc::channel(64);
        tokio::task::spawn_blocking(move || {
            tracing::debug!("draining DHT peer responses");
            loop {
                // Each iterator item is one node's batch of peer addresses.
                for peers in dht.get_peers(info_hash).into_iter().flatten() {
                    for peer in peers {
                        if tx.blocking_send(peer).is_err() {
                            // Consumer is gone; stop querying.
                            return;
                        }
                    }
                }
                // The lookup iterator ends once the query exhausts the
                // routing table; rest before asking the swarm again.
                std::thread::sleep(Duration::from_secs(ANNOUNCE_INTERVAL_SECS));
            }
        });

        Ok((Self { venue, port }, rx))
    }

    /// Hex info-hash, for the status report.
    pub fn venue(&self) -> &str {
        &self.venue
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_secret_hashes_to_known_venue() {
        let digest = info_hash_for("LetsMeetHere");
        assert_eq!(
            hex::encode(digest),
            "6d062837ce8d379e5c808f10b4ad70a678e96a8a"
        );
    }

    #[test]
    fn different_secrets_are_different_venues() {
        assert_ne!(info_hash_for("LetsMeetHere"), info_hash_for("letsmeethere"));
    }
}
