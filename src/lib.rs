//! # roamlink
//!
//! A roaming, encrypted, datagram-oriented transport: the connection layer
//! beneath an interactive remote shell. It carries opaque payloads between
//! exactly two endpoints over an unreliable, address-changing network path
//! and provides:
//!
//! - **Confidentiality and integrity**: every datagram is one AEAD
//!   ciphertext; direction and sequence ride in the authenticated nonce
//! - **Replay protection**: state updates are gated on a monotone sequence,
//!   so replayed or reordered datagrams cannot corrupt timing or targeting
//! - **Roaming**: the server re-latches its peer address whenever an
//!   authenticated, in-order datagram arrives from somewhere new
//! - **Port hopping**: the client periodically rebinds its local port to
//!   shed path-based interference while keeping the same session
//! - **RTT measurement**: 16-bit reflected timestamps feed a Jacobson
//!   estimator; ECN Congestion Experienced inflates the reflection to slow
//!   the peer down
//!
//! It deliberately does *not* provide reliability, ordering, or flow
//! control: the layer above retransmits whole state and is idempotent with
//! respect to duplicate payloads.
//!
//! ## Example
//!
//! ```no_run
//! use roamlink::crypto::SessionKey;
//! use roamlink::transport::Connection;
//!
//! # fn main() -> Result<(), roamlink::core::NetError> {
//! let key = SessionKey::generate();
//!
//! // On the server host:
//! let mut server = Connection::server(Some("0.0.0.0"), None, &key)?;
//!
//! // On the client host, after the key was shared out of band:
//! let mut client = Connection::client("203.0.113.7", 60001, &key)?;
//! client.send(b"hello");
//! if let Some(payload) = server.recv()? {
//!     server.send(&payload); // echo
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`core`]: constants and error types
//! - [`crypto`]: session key, nonce discipline, AEAD seal/open
//! - [`transport`]: packets, the connection state machine, sockets, timing

#![warn(missing_docs)]

pub mod core;
pub mod crypto;
pub mod transport;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::core::{CodecError, CryptoError, NetError};
    pub use crate::crypto::{Direction, Session, SessionKey};
    pub use crate::transport::{
        Clock, Connection, ManualClock, MonotonicClock, Packet, Role, RttEstimator,
        TIMESTAMP_NONE,
    };
}

pub use crate::core::NetError;
pub use crate::crypto::SessionKey;
pub use crate::transport::{Connection, Role};
