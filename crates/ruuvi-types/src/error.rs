//! Decode error taxonomy for advertisement payloads.

use thiserror::Error;

use crate::types::DataFormat;

/// Errors produced while decoding an advertisement payload.
///
/// Malformed or foreign-manufacturer payloads are expected noise on a BLE
/// scanner, so callers normally treat these as "skip this advertisement"
/// rather than as failures worth surfacing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// Payload is shorter than the selected format requires.
    #[error("payload too short: expected at least {expected} bytes, got {actual}")]
    InvalidLength {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes received.
        actual: usize,
    },

    /// The discriminator byte does not name a supported data format.
    #[error("unknown data format discriminator: 0x{0:02X}")]
    UnknownFormat(u8),

    /// A format-specific parser was handed a payload for a different format.
    #[error("expected {expected} payload, got discriminator 0x{actual:02X}")]
    FormatMismatch {
        /// The format the parser was asked to decode.
        expected: DataFormat,
        /// The discriminator byte actually present.
        actual: u8,
    },
}
