//! Session cipher: key handling, nonce discipline, and the AEAD boundary.
//!
//! The transport owns nonce uniqueness (the sequence counter); this module
//! only packs the direction bit and sequence into a 64-bit nonce and seals
//! or opens datagrams under it. Key agreement happens elsewhere: keys enter
//! as 32 raw bytes.

mod keys;
mod nonce;
mod session;

pub use self::keys::{SESSION_KEY_SIZE, SessionKey};
pub use self::nonce::{Direction, construct_nonce, parse_nonce};
pub use self::session::{AEAD_TAG_SIZE, MIN_DATAGRAM_SIZE, Session, WIRE_NONCE_SIZE};
