//! Core constants and error types shared by every layer.

pub mod constants;
pub mod error;

pub use self::error::{CodecError, CryptoError, NetError};
