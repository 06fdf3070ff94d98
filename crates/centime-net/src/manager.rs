//! The peer manager: owns the local nick, the outgoing sequence counter,
//! the friends registry and the full-sync flag, and runs the replication
//! subtasks (inbound dispatch, liveness sweep, heartbeat, event broadcast,
//! full-sync driver, peer dialing).
//!
//! Everything shared sits behind one `RwLock`; no task holds it across a
//! blocking or awaited operation.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use centime_shared::constants::{
    BROADCAST, DEFAULT_DHT_PORT, DEFAULT_SECRET, FRIEND_TIMEOUT_SECS, FULL_SYNC_INTERVAL_SECS,
    HEARTBEAT_INTERVAL_SECS, SWEEP_INTERVAL_SECS,
};
use centime_shared::protocol::{CMD_ALIVE, CMD_EVENT, CMD_HELLO};
use centime_shared::{BusMessage, Event};
use centime_store::Database;

use crate::bus::Bus;
use crate::error::Result;
use crate::identity::TlsIdentity;
use crate::peers::FriendRegistry;
use crate::rendezvous::Rendezvous;

#[derive(Debug, Clone)]
pub struct NetConfig {
    /// UDP port for the DHT; the TLS bus listens on the same TCP port.
    pub port: u16,
    /// Rendezvous secret the info-hash is derived from.
    pub secret: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DHT_PORT,
            secret: DEFAULT_SECRET.to_string(),
        }
    }
}

struct ManagerState {
    registry: FriendRegistry,
    sequence: i64,
    need_full_sync: bool,
}

pub struct PeerManager {
    store: Arc<Database>,
    bus: Bus,
    nick: String,
    venue: String,
    port: u16,
    state: RwLock<ManagerState>,
}

impl PeerManager {
    /// Production path: generate the TLS identity, join the DHT, open the
    /// bus and run all subtasks.
    pub async fn start(store: Arc<Database>, config: NetConfig) -> Result<Arc<Self>> {
        let identity = TlsIdentity::generate()?;
        let (bus, bus_rx) = Bus::new(&identity)?;
        let (rendezvous, peers_rx) = Rendezvous::start(&config.secret, config.port)?;
        bus.listen(config.port).await?;

        Ok(Self::spawn(
            store,
            bus,
            bus_rx,
            peers_rx,
            rendezvous.venue().to_string(),
            config.port,
        ))
    }

    /// Wire a manager onto an existing bus and peer-address stream. `start`
    /// is the production path; this seam lets tests run a mesh on loopback
    /// without touching the DHT.
    pub fn spawn(
        store: Arc<Database>,
        bus: Bus,
        bus_rx: mpsc::Receiver<Vec<u8>>,
        peers_rx: mpsc::Receiver<SocketAddr>,
        venue: String,
        port: u16,
    ) -> Arc<Self> {
        let nick = hex::encode(rand::random::<[u8; 4]>());
        info!(nick = %nick, venue = %venue, "peer manager starting");

        let pm = Arc::new(Self {
            store,
            bus,
            nick,
            venue,
            port,
            state: RwLock::new(ManagerState {
                registry: FriendRegistry::new(),
                sequence: 0,
                need_full_sync: false,
            }),
        });

        pm.spawn_inbound(bus_rx);
        pm.spawn_liveness_sweep();
        pm.spawn_heartbeat();
        pm.spawn_broadcaster();
        pm.spawn_full_sync_driver();
        pm.spawn_dialer(peers_rx);

        pm
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Human-readable status for the debug page.
    pub fn status_report(&self) -> String {
        let st = match self.state.read() {
            Ok(st) => st,
            Err(_) => return "peer state unavailable".to_string(),
        };

        let mut lines = vec![
            format!("I am {}, my sequence ID is {}", self.nick, st.sequence),
            format!("We're meeting at '{}' (port {})", self.venue, self.port),
            format!(
                "I have {} friend(s), {} connection(s) on the bus",
                st.registry.friends.len(),
                self.bus.connection_count()
            ),
            String::new(),
            "These are my friends:".to_string(),
        ];
        for friend in st.registry.friends.values() {
            lines.push(friend.to_string());
        }
        lines.push(String::new());
        lines.push("I haven't heard from these guys in a while:".to_string());
        for friend in st.registry.oldfriends.values() {
            lines.push(friend.to_string());
        }

        lines.join("\n")
    }

    /// Stamp the next sequence number onto a message and put it on the bus.
    pub fn publish(&self, to: &str, cmd: &str, payload: &str) {
        let msg = {
            let mut st = match self.state.write() {
                Ok(st) => st,
                Err(_) => {
                    error!("peer state lock poisoned, dropping publish");
                    return;
                }
            };
            st.sequence += 1;
            BusMessage::new(&self.nick, to, st.sequence, cmd, payload)
        };

        match msg.to_bytes() {
            Ok(bytes) => self.bus.send(&bytes),
            Err(e) => error!(error = %e, "can't encode bus message"),
        }
    }

    /// One inbound message: addressing filter, friend bookkeeping, seq
    /// dedup, then command dispatch.
    fn dispatch(&self, msg: BusMessage) {
        if !msg.addressed_to(&self.nick) {
            return;
        }

        let (is_new, accepted) = {
            let mut st = match self.state.write() {
                Ok(st) => st,
                Err(_) => return,
            };
            let is_new = st.registry.observe(&msg.from);
            if is_new {
                st.need_full_sync = true;
            }
            let accepted = st
                .registry
                .friends
                .get_mut(&msg.from)
                .is_some_and(|f| f.accept(&msg));
            (is_new, accepted)
        };

        if accepted {
            self.handle(&msg);
        }

        if is_new {
            info!(nick = %msg.from, "made a new friend");
            self.publish(&msg.from, CMD_HELLO, "");
        }
    }

    fn handle(&self, msg: &BusMessage) {
        match msg.cmd.as_str() {
            CMD_EVENT => match serde_json::from_str::<Event>(&msg.payload) {
                Ok(event) => {
                    debug!(event = %event.event_id, from = %msg.from, "got a replicated event");
                    if let Err(e) = self.store.merge_event(&event) {
                        error!(error = %e, event = %event.event_id, "can't merge replicated event");
                    }
                }
                Err(e) => warn!(error = %e, from = %msg.from, "can't decode event payload"),
            },
            CMD_HELLO => {
                // They just learned about us; push everything we have.
                if let Ok(mut st) = self.state.write() {
                    st.need_full_sync = true;
                }
            }
            CMD_ALIVE => {}
            other => {
                debug!(cmd = %other, from = %msg.from, "unhandled command");
            }
        }
    }

    fn spawn_inbound(self: &Arc<Self>, mut bus_rx: mpsc::Receiver<Vec<u8>>) {
        let pm = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = bus_rx.recv().await {
                match BusMessage::from_bytes(&frame) {
                    Ok(msg) => pm.dispatch(msg),
                    Err(e) => {
                        warn!(error = %e, len = frame.len(), "dropping malformed bus frame");
                    }
                }
            }
        });
    }

    fn spawn_liveness_sweep(self: &Arc<Self>) {
        let pm = Arc::clone(self);
        tokio::spawn(async move {
            let timeout = Duration::from_secs(FRIEND_TIMEOUT_SECS);
            let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                let stale = match pm.state.write() {
                    Ok(mut st) => st.registry.sweep(timeout),
                    Err(_) => return,
                };
                for nick in stale {
                    info!(nick = %nick, "haven't heard from this friend in a while");
                }
            }
        });
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let pm = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
            let mut counter: u64 = 0;
            loop {
                interval.tick().await;
                pm.publish(BROADCAST, CMD_ALIVE, &counter.to_string());
                counter += 1;
            }
        });
    }

    fn spawn_broadcaster(self: &Arc<Self>) {
        let Some(mut events_rx) = self.store.take_event_stream() else {
            warn!("event stream already taken, not broadcasting local events");
            return;
        };
        let pm = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => pm.publish(BROADCAST, CMD_EVENT, &json),
                    Err(e) => error!(error = %e, "can't encode event for the bus"),
                }
            }
        });
    }

    fn spawn_full_sync_driver(self: &Arc<Self>) {
        let pm = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(FULL_SYNC_INTERVAL_SECS));
            loop {
                interval.tick().await;

                let due = match pm.state.write() {
                    Ok(mut st) => std::mem::take(&mut st.need_full_sync),
                    Err(_) => return,
                };
                if !due {
                    continue;
                }

                info!("doing a full sync");
                let sender = pm.store.events().sender();
                let envelopes = match pm.store.all_envelopes() {
                    Ok(envelopes) => envelopes,
                    Err(e) => {
                        error!(error = %e, "can't enumerate envelopes for full sync");
                        continue;
                    }
                };

                for envelope in envelopes {
                    let events = match pm.store.envelope_with_history(envelope.id) {
                        Ok((_, events)) => events,
                        Err(e) => {
                            error!(error = %e, envelope = %envelope.id, "can't load history for full sync");
                            continue;
                        }
                    };
                    for event in events {
                        // Blocking send: full sync prefers backpressure
                        // over dropping.
                        if sender.send(event).await.is_err() {
                            warn!("event stream closed, stopping full sync driver");
                            return;
                        }
                    }
                }
            }
        });
    }

    fn spawn_dialer(self: &Arc<Self>, mut peers_rx: mpsc::Receiver<SocketAddr>) {
        let pm = Arc::clone(self);
        tokio::spawn(async move {
            let mut seen: HashSet<SocketAddr> = HashSet::new();
            while let Some(addr) = peers_rx.recv().await {
                if !seen.insert(addr) {
                    continue;
                }
                debug!(peer = %addr, "got a new peer from the DHT");
                let bus = pm.bus.clone();
                tokio::spawn(async move {
                    if let Err(e) = bus.dial(addr).await {
                        warn!(peer = %addr, error = %e, "can't connect to peer");
                    }
                });
            }
        });
    }
}
