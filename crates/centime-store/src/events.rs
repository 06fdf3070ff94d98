//! The seam between the ledger and the replication layer.
//!
//! Local writes *offer* their events here without ever blocking on network
//! state: if the single consumer (the peer manager's broadcaster) is not
//! currently draining, the offer is dropped. The event is already durable
//! in history at that point; only the immediate replication opportunity is
//! lost, and the periodic full sync re-emits the whole ledger anyway.
//!
//! The full-sync driver pushes history back through a cloned sender with
//! blocking sends, so a slow drain applies backpressure there instead of
//! dropping.

use tokio::sync::mpsc;

use centime_shared::Event;

pub struct EventSource {
    tx: mpsc::Sender<Event>,
}

impl EventSource {
    /// Smallest buffer tokio offers; keeps the drop-when-no-consumer
    /// semantics of an unbuffered channel.
    const CAPACITY: usize = 1;

    pub fn new() -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(Self::CAPACITY);
        (Self { tx }, rx)
    }

    /// Non-blocking offer. Dropped offers are logged at debug level only;
    /// they are an expected steady-state when no replicator runs.
    pub fn offer(&self, event: &Event) {
        if self.tx.try_send(event.clone()).is_err() {
            tracing::debug!(event = %event.event_id, "no replicator draining, offer dropped");
        }
    }

    /// A sender for callers that want backpressure instead of drops.
    pub fn sender(&self) -> mpsc::Sender<Event> {
        self.tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn offer_drops_without_consumer() {
        let (source, mut rx) = EventSource::new();

        // First offer parks in the buffer slot, the rest drop silently.
        for _ in 0..10 {
            source.offer(&Event::for_envelope(Uuid::new_v4()));
        }

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offer_reaches_a_draining_consumer() {
        let (source, mut rx) = EventSource::new();
        let event = Event::for_envelope(Uuid::new_v4());

        source.offer(&event);
        let received = rx.recv().await.expect("offer should arrive");
        assert_eq!(received.event_id, event.event_id);
    }
}
