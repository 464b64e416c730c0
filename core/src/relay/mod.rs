//! Real-time relay between the two parties of a session
//!
//! A session id names a channel; every connection subscribed to it receives
//! what is published there. No replay, no acknowledgements.

pub mod channel;
pub mod protocol;

pub use channel::{ConnectionId, RelayChannel, RelayStats};
pub use protocol::{
    ClientCommand, RelayEvent, RelayFrame, RelayProtocolError, DISPATCH_STATUS, UNLOCK_TERMINAL,
};
