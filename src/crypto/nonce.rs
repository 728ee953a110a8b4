//! Nonce construction.
//!
//! Nonces are 64-bit values:
//! - Bit 63: direction (1 = to-client, 0 = to-server)
//! - Bits 62..0: sequence number
//!
//! The sequence counter is the sole source of uniqueness; a nonce is never
//! reused within a session.

/// High bit carries the direction flag.
const DIRECTION_MASK: u64 = 1 << 63;

/// Remaining 63 bits carry the sequence number.
const SEQUENCE_MASK: u64 = !DIRECTION_MASK;

/// Direction of communication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Client → Server (direction bit 0)
    ToServer,
    /// Server → Client (direction bit 1)
    ToClient,
}

impl Direction {
    /// Get the opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            Direction::ToServer => Direction::ToClient,
            Direction::ToClient => Direction::ToServer,
        }
    }
}

/// Pack a direction and sequence number into a 64-bit nonce.
pub fn construct_nonce(direction: Direction, seq: u64) -> u64 {
    let flag = match direction {
        Direction::ToServer => 0,
        Direction::ToClient => DIRECTION_MASK,
    };
    flag | (seq & SEQUENCE_MASK)
}

/// Unpack a 64-bit nonce into its direction and sequence number.
pub fn parse_nonce(nonce: u64) -> (Direction, u64) {
    let direction = if nonce & DIRECTION_MASK != 0 {
        Direction::ToClient
    } else {
        Direction::ToServer
    };
    (direction, nonce & SEQUENCE_MASK)
}
