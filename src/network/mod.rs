//! Network collaborator
//!
//! Hands fully-signed proposal transactions to whatever relays them to the
//! blockchain network.

pub mod broadcast;

pub use broadcast::{
    BroadcastError, Broadcaster, OutboxBroadcaster, OutboxEntry, RecordingBroadcaster,
};
