//! End-to-end replication between two peer managers on loopback.
//!
//! The DHT is replaced by hand-fed addresses; everything else (TLS bus,
//! friend tracking, hello/full-sync handshake, event broadcast) runs the
//! production code paths.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use centime_net::{Bus, PeerManager, TlsIdentity};
use centime_store::Database;

async fn wait_for(what: &str, deadline: Duration, mut check: impl FnMut() -> bool) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_peers_converge_over_the_bus() {
    let dir = tempfile::tempdir().unwrap();
    let store_a = Arc::new(Database::open(dir.path().join("a.sqlite")).unwrap());
    let store_b = Arc::new(Database::open(dir.path().join("b.sqlite")).unwrap());

    // History that exists before the peers ever meet; only the full sync
    // can carry it over.
    let offline_envelope = Uuid::new_v4();
    store_a
        .apply_meta_change(offline_envelope, "Rent", 100_000, 80_000)
        .unwrap();
    store_a
        .apply_balance_change(offline_envelope, 42_000, "deposit")
        .unwrap();

    let identity_a = TlsIdentity::generate().unwrap();
    let identity_b = TlsIdentity::generate().unwrap();
    let (bus_a, bus_rx_a) = Bus::new(&identity_a).unwrap();
    let (bus_b, bus_rx_b) = Bus::new(&identity_b).unwrap();
    let bus_a_handle = bus_a.clone();

    let listen_addr = bus_b.listen(0).await.unwrap();
    let addr_b: SocketAddr = SocketAddr::from(([127, 0, 0, 1], listen_addr.port()));

    let (peers_tx_a, peers_rx_a) = mpsc::channel(8);
    let (_peers_tx_b, peers_rx_b) = mpsc::channel(8);

    let _pm_a = PeerManager::spawn(
        Arc::clone(&store_a),
        bus_a,
        bus_rx_a,
        peers_rx_a,
        "testvenue".to_string(),
        0,
    );
    let _pm_b = PeerManager::spawn(
        Arc::clone(&store_b),
        bus_b,
        bus_rx_b,
        peers_rx_b,
        "testvenue".to_string(),
        0,
    );

    // Feed A the address the DHT would have produced.
    peers_tx_a.send(addr_b).await.unwrap();
    wait_for("the bus connection", Duration::from_secs(10), || {
        bus_a_handle.connection_count() > 0
    })
    .await;

    // The pre-connection history arrives via heartbeat -> new friend ->
    // hello -> full sync.
    wait_for(
        "the offline history to replicate",
        Duration::from_secs(30),
        || {
            store_b
                .all_envelopes()
                .map(|envs| {
                    envs.iter().any(|e| {
                        e.id == offline_envelope && e.balance == 42_000 && e.name == "Rent"
                    })
                })
                .unwrap_or(false)
        },
    )
    .await;

    // A live edit takes the direct broadcast path.
    let live_envelope = Uuid::new_v4();
    store_a
        .apply_balance_change(live_envelope, 500, "coffee fund")
        .unwrap();

    wait_for(
        "the live event to replicate",
        Duration::from_secs(30),
        || {
            store_b
                .all_envelopes()
                .map(|envs| envs.iter().any(|e| e.id == live_envelope && e.balance == 500))
                .unwrap_or(false)
        },
    )
    .await;

    // Both ledgers hold the same projections for the replicated ids.
    let a = store_a.envelope(offline_envelope).unwrap();
    let b = store_b.envelope(offline_envelope).unwrap();
    assert_eq!((a.balance, a.target, a.month_target), (b.balance, b.target, b.month_target));
}
