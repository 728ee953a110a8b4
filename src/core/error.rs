//! Error types.

use thiserror::Error;

/// Failures of the AEAD seal/open boundary.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed: bad tag, wrong key, or malformed ciphertext.
    /// All open failures collapse into this one variant so an attacker
    /// learns nothing from the failure mode.
    #[error("AEAD decryption failed")]
    DecryptionFailed,
}

/// Failures while decoding a received datagram into a packet.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The datagram did not decrypt.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The plaintext is shorter than the timestamp header.
    #[error("plaintext too short: {actual} bytes")]
    TooShort {
        /// Plaintext length actually recovered.
        actual: usize,
    },
}

/// Transport-level errors.
///
/// Constructors return these directly; `recv` returns only the fatal
/// receive cases; send failures are deferred and polled via
/// [`Connection::last_send_error`](crate::transport::Connection::last_send_error).
#[derive(Debug, Error)]
pub enum NetError {
    /// Name resolution failed.
    #[error("could not resolve {host:?}: {source}")]
    Resolve {
        /// Host that failed to resolve.
        host: String,
        /// Underlying resolver error.
        source: std::io::Error,
    },

    /// Resolution succeeded but produced no usable address.
    #[error("no usable address for {host:?}")]
    NoAddress {
        /// Host that resolved to nothing.
        host: String,
    },

    /// Every candidate in the port search range failed to bind.
    #[error("could not bind any port in {low}..={high}: {source}")]
    BindExhausted {
        /// Low end of the searched range.
        low: u16,
        /// High end of the searched range.
        high: u16,
        /// Last bind error observed.
        source: std::io::Error,
    },

    /// A socket operation failed.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// A received datagram exceeded the receive buffer and was truncated.
    #[error("received oversize datagram")]
    Oversize,

    /// The kernel accepted fewer bytes than one whole datagram.
    #[error("short write: sent {sent} of {len} bytes")]
    ShortSend {
        /// Bytes the kernel accepted.
        sent: usize,
        /// Datagram length.
        len: usize,
    },

    /// Encryption failed while building an outbound datagram.
    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    /// A received datagram carried a source address of a family this
    /// transport does not speak. This is a bug, not a runtime condition.
    #[error("unknown address family {0}")]
    UnknownAddressFamily(i32),
}
