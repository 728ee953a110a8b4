//! ChaCha20-Poly1305 seal/open for whole datagrams.
//!
//! One UDP datagram is one ciphertext:
//!
//! ```text
//! [ nonce (8, BE64) | AEAD ciphertext + tag (16) ]
//! ```
//!
//! The 64-bit nonce travels in the clear and is recovered by `decrypt`; the
//! AEAD nonce is the same value padded to the cipher's native 96 bits with a
//! leading zero word. Integrity of the nonce is enforced by the tag check:
//! a datagram whose nonce bytes were tampered with fails to open.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use crate::core::error::CryptoError;
use crate::crypto::keys::SessionKey;

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// Bytes of nonce carried in the clear at the head of each datagram.
pub const WIRE_NONCE_SIZE: usize = 8;

/// Smallest datagram that can possibly open: nonce plus tag, empty payload.
pub const MIN_DATAGRAM_SIZE: usize = WIRE_NONCE_SIZE + AEAD_TAG_SIZE;

/// Keyed AEAD state, owned 1:1 by a connection for its lifetime.
///
/// The session itself is stateless between calls; the connection's sequence
/// counter guarantees that no nonce is ever passed to `encrypt` twice.
pub struct Session {
    cipher: ChaCha20Poly1305,
}

impl Session {
    /// Create a session from a pre-shared key.
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }

    /// Seal one plaintext under one nonce into one wire datagram.
    pub fn encrypt(&self, nonce: u64, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes = aead_nonce(nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut datagram = Vec::with_capacity(WIRE_NONCE_SIZE + ciphertext.len());
        datagram.extend_from_slice(&nonce.to_be_bytes());
        datagram.extend_from_slice(&ciphertext);
        Ok(datagram)
    }

    /// Open one wire datagram, recovering the nonce and plaintext.
    pub fn decrypt(&self, datagram: &[u8]) -> Result<(u64, Vec<u8>), CryptoError> {
        if datagram.len() < MIN_DATAGRAM_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let mut wire_nonce = [0u8; WIRE_NONCE_SIZE];
        wire_nonce.copy_from_slice(&datagram[..WIRE_NONCE_SIZE]);
        let nonce = u64::from_be_bytes(wire_nonce);

        let nonce_bytes = aead_nonce(nonce);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                &datagram[WIRE_NONCE_SIZE..],
            )
            .map_err(|_| CryptoError::DecryptionFailed)?;

        Ok((nonce, plaintext))
    }
}

/// Pad the 64-bit nonce to the cipher's 96-bit width.
fn aead_nonce(nonce: u64) -> [u8; 12] {
    let mut bytes = [0u8; 12];
    bytes[4..12].copy_from_slice(&nonce.to_be_bytes());
    bytes
}
