/// Shared rendezvous secret. Everyone announcing at SHA-1 of this string is
/// a full participant; overriding it yields a private swarm.
pub const DEFAULT_SECRET: &str = "LetsMeetHere";

/// Default UDP port for the DHT client. The TLS bus listens on the same
/// port number over TCP.
pub const DEFAULT_DHT_PORT: u16 = 55000;

/// Default bind address of the local web UI.
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8081";

/// Default SQLite database filename, relative to the working directory.
pub const DEFAULT_DB_FILE: &str = "envelopes.sqlite";

/// Broadcast destination nick.
pub const BROADCAST: &str = "*";

/// How often we re-announce ourselves against the rendezvous info-hash.
pub const ANNOUNCE_INTERVAL_SECS: u64 = 5;

/// How often every peer broadcasts an `i'm alive` heartbeat.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// How often the liveness sweep looks for silent friends.
pub const SWEEP_INTERVAL_SECS: u64 = 2;

/// A friend silent for longer than this moves to the old-friends map.
pub const FRIEND_TIMEOUT_SECS: u64 = 10;

/// How often the full-sync driver checks the sync flag.
pub const FULL_SYNC_INTERVAL_SECS: u64 = 5;

/// Upper bound on a single bus frame. The protocol itself is unbounded but
/// receivers must accept at least 64 KiB; anything above this is treated as
/// a malformed frame and the connection is dropped.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Validity of the throwaway TLS certificate generated at process start.
pub const CERT_VALIDITY_DAYS: i64 = 10;
