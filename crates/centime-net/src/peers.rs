//! Friends: peers we have heard from recently.
//!
//! A friend is plain data; all message dispatch lives on the peer manager.
//! Friends silent for longer than the timeout move to the old-friends map
//! and are never deleted. A peer that comes back gets a brand-new entry,
//! which is what re-arms the full sync.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use centime_shared::BusMessage;

#[derive(Debug, Clone)]
pub struct Friend {
    pub nick: String,
    pub last_message: Option<BusMessage>,
    pub last_seen: Instant,
    pub last_seq: i64,
}

impl Friend {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            last_message: None,
            last_seen: Instant::now(),
            last_seq: 0,
        }
    }

    /// Record the message if it advances this friend's sequence. Returns
    /// false for bus echoes and replays, which the caller must drop.
    pub fn accept(&mut self, msg: &BusMessage) -> bool {
        if self.last_message.is_some() && msg.seq <= self.last_seq {
            return false;
        }

        self.last_seq = msg.seq;
        self.last_seen = Instant::now();
        self.last_message = Some(msg.clone());
        true
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

impl std::fmt::Display for Friend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.last_message {
            Some(msg) => write!(
                f,
                "{}: last message: {}, last seen: {:.0?} ago",
                self.nick,
                msg,
                self.last_seen.elapsed()
            ),
            None => write!(
                f,
                "{}: no message, last seen: {:.0?} ago",
                self.nick,
                self.last_seen.elapsed()
            ),
        }
    }
}

#[derive(Debug, Default)]
pub struct FriendRegistry {
    pub friends: HashMap<String, Friend>,
    pub oldfriends: HashMap<String, Friend>,
}

impl FriendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a message from `nick`. Returns true when this created a fresh
    /// friend (including the return of an old friend), which is the signal
    /// to arm a full sync and greet them.
    pub fn observe(&mut self, nick: &str) -> bool {
        if self.friends.contains_key(nick) {
            return false;
        }
        self.oldfriends.remove(nick);
        self.friends.insert(nick.to_string(), Friend::new(nick));
        true
    }

    /// Move every friend silent for longer than `timeout` to the
    /// old-friends map. Returns the nicks that went stale.
    pub fn sweep(&mut self, timeout: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .friends
            .values()
            .filter(|f| f.is_stale(timeout))
            .map(|f| f.nick.clone())
            .collect();

        for nick in &stale {
            if let Some(friend) = self.friends.remove(nick) {
                self.oldfriends.insert(nick.clone(), friend);
            }
        }

        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use centime_shared::protocol::CMD_ALIVE;

    fn msg(seq: i64) -> BusMessage {
        BusMessage::new("aabbccdd", "*", seq, CMD_ALIVE, "")
    }

    #[test]
    fn accepts_monotonically_increasing_seq() {
        let mut friend = Friend::new("aabbccdd");

        assert!(friend.accept(&msg(1)));
        assert!(friend.accept(&msg(2)));
        assert!(friend.accept(&msg(10)));
        assert_eq!(friend.last_seq, 10);
    }

    #[test]
    fn drops_replays_and_reorders() {
        let mut friend = Friend::new("aabbccdd");

        assert!(friend.accept(&msg(5)));
        assert!(!friend.accept(&msg(5)));
        assert!(!friend.accept(&msg(3)));
        assert_eq!(friend.last_seq, 5);
    }

    #[test]
    fn fresh_friend_accepts_any_first_seq() {
        // A restarted peer starts its counter over; the fresh Friend entry
        // must not hold it to the old peer's sequence.
        let mut friend = Friend::new("aabbccdd");
        assert!(friend.accept(&msg(-7)));
    }

    #[test]
    fn observe_creates_once() {
        let mut registry = FriendRegistry::new();

        assert!(registry.observe("aabbccdd"));
        assert!(!registry.observe("aabbccdd"));
        assert_eq!(registry.friends.len(), 1);
    }

    #[test]
    fn sweep_moves_stale_friends() {
        let mut registry = FriendRegistry::new();
        registry.observe("aabbccdd");

        // Nothing is stale against a generous timeout.
        assert!(registry.sweep(Duration::from_secs(60)).is_empty());

        // Everything is stale against a zero timeout.
        let stale = registry.sweep(Duration::ZERO);
        assert_eq!(stale, vec!["aabbccdd".to_string()]);
        assert!(registry.friends.is_empty());
        assert_eq!(registry.oldfriends.len(), 1);
    }

    #[test]
    fn returning_friend_is_a_new_object() {
        let mut registry = FriendRegistry::new();
        registry.observe("aabbccdd");
        if let Some(friend) = registry.friends.get_mut("aabbccdd") {
            friend.accept(&msg(42));
        }
        registry.sweep(Duration::ZERO);

        // The peer comes back: new Friend, sequence state reset.
        assert!(registry.observe("aabbccdd"));
        assert!(registry.oldfriends.is_empty());
        let friend = &registry.friends["aabbccdd"];
        assert!(friend.last_message.is_none());
        assert_eq!(friend.last_seq, 0);
    }
}
