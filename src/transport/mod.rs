//! The transport layer: one authenticated datagram stream between exactly
//! two endpoints.
//!
//! - **Packet codec**: [`Packet`] framing inside the AEAD plaintext
//! - **Connection state machine**: [`Connection`] with roles, roaming, and
//!   the sequence gate that anchors replay protection
//! - **RTT estimation**: [`RttEstimator`] with the [`Clock`] collaborator
//! - **Socket lifecycle**: [`DatagramSocket`] with bind-range search,
//!   DSCP/ECN options, and client port hopping
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        State synchronization            │   (not this crate)
//! ├─────────────────────────────────────────┤
//! │         Transport layer                 │  ← this module
//! │   packets, sequence gate, RTT, roaming  │
//! ├─────────────────────────────────────────┤
//! │         Session cipher                  │   crate::crypto
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Control flow is caller-driven and synchronous: the caller polls the
//! socket for readability, receives, and sends at its own cadence with
//! [`Connection::timeout`] as the pacing hint. Nothing here spawns threads
//! or retransmits; the layer above resynchronizes whole state instead.

mod connection;
mod packet;
mod socket;
mod timing;

pub use connection::{Connection, Role};
pub use packet::{Packet, TIMESTAMP_HEADER_SIZE, TIMESTAMP_NONE};
pub use socket::{DSCP_AF42_ECT0, DatagramSocket, RecvMeta};
pub use timing::{Clock, ManualClock, MonotonicClock, RttEstimator, timestamp_diff, timestamp16};
