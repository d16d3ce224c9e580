//! Platform-agnostic types for RuuviTag sensor broadcasts.
//!
//! This crate defines the normalized data model shared by the decoder and the
//! publisher pipeline:
//!
//! - [`RawPayload`]: an advertisement payload plus its out-of-band metadata
//!   (signal strength, timestamp, source hardware address)
//! - [`DecodedSample`]: the normalized measurement record produced by the
//!   payload decoder
//! - [`DataFormat`]: the wire-format discriminator (RAWv2, Data Format 6,
//!   Extended V1)
//! - [`Device`]: externally supplied known-device metadata
//! - MAC address utilities ([`format_mac`], [`parse_mac`], [`MacKey`])
//!
//! No I/O happens here; everything is plain data.

pub mod error;
pub mod mac;
pub mod types;

pub use error::DecodeError;
pub use mac::{MacKey, MacParseError, format_mac, parse_mac};
pub use types::{DataFormat, DecodedSample, Device, RawPayload};
