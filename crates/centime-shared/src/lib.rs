// Domain and wire types shared between the store, the replication layer and
// the HTTP surface.

pub mod constants;
pub mod protocol;
pub mod types;

pub use protocol::BusMessage;
pub use types::{Envelope, Event};
