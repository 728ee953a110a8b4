//! Packet framing.
//!
//! The plaintext of every datagram is a fixed four-byte timestamp header
//! followed by the opaque payload:
//!
//! ```text
//! +------------------+------------------------+---------------+
//! | timestamp        | timestamp_reply        | payload       |
//! | 2 bytes (BE16)   | 2 bytes (BE16)         | variable      |
//! +------------------+------------------------+---------------+
//! ```
//!
//! Direction and sequence never appear in the plaintext; they ride in the
//! nonce and are therefore covered by the AEAD tag.

use crate::core::error::{CodecError, CryptoError};
use crate::crypto::{Direction, Session, construct_nonce, parse_nonce};

/// Sentinel meaning "no timestamp": suppresses the corresponding effect on
/// the receiver.
pub const TIMESTAMP_NONE: u16 = 0xFFFF;

/// Bytes of timestamp header preceding the payload.
pub const TIMESTAMP_HEADER_SIZE: usize = 4;

/// One in-memory datagram, transient per send or receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Which endpoint this packet is addressed to.
    pub direction: Direction,
    /// 63-bit sequence number; unique per direction for the session's life.
    pub seq: u64,
    /// Sender's clock reading, or [`TIMESTAMP_NONE`].
    pub timestamp: u16,
    /// Reflection of the peer's last timestamp, or [`TIMESTAMP_NONE`].
    pub timestamp_reply: u16,
    /// Opaque application payload.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Seal this packet into one wire datagram.
    pub fn encode(&self, session: &Session) -> Result<Vec<u8>, CryptoError> {
        let nonce = construct_nonce(self.direction, self.seq);

        let mut plaintext = Vec::with_capacity(TIMESTAMP_HEADER_SIZE + self.payload.len());
        plaintext.extend_from_slice(&self.timestamp.to_be_bytes());
        plaintext.extend_from_slice(&self.timestamp_reply.to_be_bytes());
        plaintext.extend_from_slice(&self.payload);

        session.encrypt(nonce, &plaintext)
    }

    /// Open one wire datagram into a packet.
    pub fn decode(datagram: &[u8], session: &Session) -> Result<Self, CodecError> {
        let (nonce, plaintext) = session.decrypt(datagram)?;

        if plaintext.len() < TIMESTAMP_HEADER_SIZE {
            return Err(CodecError::TooShort {
                actual: plaintext.len(),
            });
        }

        let (direction, seq) = parse_nonce(nonce);
        let timestamp = u16::from_be_bytes([plaintext[0], plaintext[1]]);
        let timestamp_reply = u16::from_be_bytes([plaintext[2], plaintext[3]]);

        Ok(Self {
            direction,
            seq,
            timestamp,
            timestamp_reply,
            payload: plaintext[TIMESTAMP_HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SessionKey;

    fn session() -> Session {
        Session::new(&SessionKey::from_bytes([0x17; 32]))
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let session = session();
        let packet = Packet {
            direction: Direction::ToClient,
            seq: 12345,
            timestamp: 77,
            timestamp_reply: 3,
            payload: b"hello".to_vec(),
        };

        let decoded = Packet::decode(&packet.encode(&session).unwrap(), &session).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_roundtrip_preserves_sentinel() {
        let session = session();
        let packet = Packet {
            direction: Direction::ToServer,
            seq: 0,
            timestamp: TIMESTAMP_NONE,
            timestamp_reply: TIMESTAMP_NONE,
            payload: Vec::new(),
        };

        let decoded = Packet::decode(&packet.encode(&session).unwrap(), &session).unwrap();
        assert_eq!(decoded.timestamp, TIMESTAMP_NONE);
        assert_eq!(decoded.timestamp_reply, TIMESTAMP_NONE);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_direction_isolation() {
        // A server-emitted packet can never decode as to-server, and vice
        // versa: the direction rides in the authenticated nonce.
        let session = session();
        for (direction, seq) in [(Direction::ToClient, 9), (Direction::ToServer, 10)] {
            let packet = Packet {
                direction,
                seq,
                timestamp: 1,
                timestamp_reply: TIMESTAMP_NONE,
                payload: b"x".to_vec(),
            };
            let decoded = Packet::decode(&packet.encode(&session).unwrap(), &session).unwrap();
            assert_eq!(decoded.direction, direction);
            assert_ne!(decoded.direction, direction.opposite());
        }
    }

    #[test]
    fn test_truncated_plaintext_rejected() {
        // A datagram whose plaintext is shorter than the timestamp header is
        // malformed even though it authenticates.
        let session = session();
        let datagram = session
            .encrypt(construct_nonce(Direction::ToServer, 1), &[0xAB; 3])
            .unwrap();
        assert!(matches!(
            Packet::decode(&datagram, &session),
            Err(CodecError::TooShort { actual: 3 })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let session = session();
        assert!(Packet::decode(&[0u8; 64], &session).is_err());
    }
}
