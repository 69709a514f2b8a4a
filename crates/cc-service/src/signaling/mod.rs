//! WebSocket signaling: event types and the relay that routes them.

pub mod events;
pub mod relay;

pub use events::{ClientEvent, PeerInfo, RelayKind, ServerEvent};
pub use relay::{SignalingPeer, SignalingRelay};
