//! Actor model for room membership and signaling fan-out.
//!
//! # Actor Hierarchy
//!
//! ```text
//! MembershipActor (singleton per instance)
//! ├── supervises N RoomActors (one per active room token)
//! │
//! RoomActor
//! ├── owns the ordered member list
//! └── holds ConnectionActorHandles for fan-out
//!
//! ConnectionActor (one per WebSocket)
//! └── forwards ServerEvents to the socket writer
//! ```
//!
//! # Cancellation
//!
//! The `MembershipActor` owns the root `CancellationToken`. Room actors and
//! connection actors get child tokens, so cancelling the root tears down the
//! whole tree.
//!
//! # Panic Recovery
//!
//! The supervisor polls its rooms' `JoinHandle`s every few seconds. A
//! panicked room is removed and counted; its members see the room as missing
//! and can join again.

pub mod connection;
pub mod membership;
pub mod messages;
pub mod metrics;
pub mod room;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use membership::{JoinedRoom, MembershipTable, MAX_JOIN_ATTEMPTS};
pub use messages::{JoinOutcome, JoinRequest, MembershipStatus, RoomSnapshot};
pub use metrics::ActorMetrics;
pub use room::{RoomActor, RoomActorHandle};
