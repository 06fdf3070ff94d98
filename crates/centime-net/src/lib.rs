// Replication layer: DHT rendezvous, TLS message bus, peer manager.

pub mod bus;
pub mod identity;
pub mod manager;
pub mod peers;
pub mod rendezvous;

mod error;

pub use bus::Bus;
pub use error::{NetError, Result};
pub use identity::TlsIdentity;
pub use manager::{NetConfig, PeerManager};
pub use peers::{Friend, FriendRegistry};
pub use rendezvous::Rendezvous;
