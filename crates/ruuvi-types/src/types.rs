//! Core data model for RuuviTag advertisement payloads.

use core::fmt;

use bytes::Bytes;
use time::OffsetDateTime;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Wire format of an advertisement payload, identified by its first byte.
///
/// The set is closed on purpose: `payload_len` and the decoder dispatch both
/// rely on matching every variant, and a new wire format is a semver-breaking
/// addition anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataFormat {
    /// RAWv2: the classic 24-byte RuuviTag broadcast with temperature,
    /// humidity, pressure, acceleration, power info and a full MAC address.
    RawV2 = 0x05,
    /// Data Format 6: the compact 20-byte air-quality broadcast with a
    /// truncated 3-byte MAC address.
    DataFormat6 = 0x06,
    /// Extended V1: the 40-byte extended-advertisement air-quality broadcast.
    ExtendedV1 = 0xE1,
}

impl DataFormat {
    /// Fixed payload length in bytes for this format.
    #[must_use]
    pub const fn payload_len(self) -> usize {
        match self {
            DataFormat::RawV2 => 24,
            DataFormat::DataFormat6 => 20,
            DataFormat::ExtendedV1 => 40,
        }
    }
}

impl TryFrom<u8> for DataFormat {
    type Error = DecodeError;

    /// Convert a discriminator byte to a `DataFormat`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ruuvi_types::DataFormat;
    ///
    /// assert_eq!(DataFormat::try_from(0x05), Ok(DataFormat::RawV2));
    /// assert_eq!(DataFormat::try_from(0xE1), Ok(DataFormat::ExtendedV1));
    /// assert!(DataFormat::try_from(0x03).is_err());
    /// ```
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x05 => Ok(DataFormat::RawV2),
            0x06 => Ok(DataFormat::DataFormat6),
            0xE1 => Ok(DataFormat::ExtendedV1),
            other => Err(DecodeError::UnknownFormat(other)),
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataFormat::RawV2 => write!(f, "RAWv2"),
            DataFormat::DataFormat6 => write!(f, "Data Format 6"),
            DataFormat::ExtendedV1 => write!(f, "Extended V1"),
        }
    }
}

// Serialized as the numeric discriminator so downstream consumers see
// `"format": 5` rather than a variant name.
#[cfg(feature = "serde")]
impl Serialize for DataFormat {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for DataFormat {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        DataFormat::try_from(value).map_err(serde::de::Error::custom)
    }
}

/// A raw advertisement payload with its out-of-band reception metadata.
///
/// Ephemeral: produced by the advertisement source for every received
/// broadcast and consumed immediately by the decoder, never persisted.
#[derive(Debug, Clone)]
pub struct RawPayload {
    /// Manufacturer-specific data bytes, starting at the discriminator byte.
    pub data: Bytes,
    /// Received signal strength in dBm.
    pub signal_strength: f64,
    /// When the advertisement was received.
    pub timestamp: OffsetDateTime,
    /// The advertising device's full hardware address, when the platform BLE
    /// stack exposes it. Used to reconstruct the truncated Data Format 6 MAC.
    pub source_address: Option<u64>,
}

impl RawPayload {
    /// Create a payload received right now with no source address.
    #[must_use]
    pub fn new(data: impl Into<Bytes>, signal_strength: f64) -> Self {
        Self {
            data: data.into(),
            signal_strength,
            timestamp: OffsetDateTime::now_utc(),
            source_address: None,
        }
    }

    /// Attach the advertising device's hardware address.
    #[must_use]
    pub fn with_source_address(mut self, address: u64) -> Self {
        self.source_address = Some(address);
        self
    }
}

/// The normalized measurement record produced by the payload decoder.
///
/// Which optional fields are populated depends on [`DataFormat`]; a field
/// whose raw encoding was the documented "out of range" sentinel is `None`,
/// never a numeric extreme. Instances are immutable after construction apart
/// from an explicit caller-supplied transform that may null out fields for
/// selective republishing.
///
/// Serializes with camelCase property names; absent fields are omitted from
/// the output entirely.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DecodedSample {
    /// Wire format this sample was decoded from.
    pub format: DataFormat,
    /// Reception timestamp, copied from the raw payload.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Received signal strength in dBm, copied from the raw payload.
    pub signal_strength: f64,
    /// Temperature in degrees Celsius.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub temperature: Option<f64>,
    /// Relative humidity percentage.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub humidity: Option<f64>,
    /// Atmospheric pressure in hPa.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub pressure: Option<f64>,
    /// X-axis acceleration in g.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub acceleration_x: Option<f64>,
    /// Y-axis acceleration in g.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub acceleration_y: Option<f64>,
    /// Z-axis acceleration in g.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub acceleration_z: Option<f64>,
    /// Battery voltage in volts.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub battery_voltage: Option<f64>,
    /// Transmission power in dBm.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub tx_power: Option<i16>,
    /// Movement counter (increments on motion events).
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub movement_counter: Option<u8>,
    /// Measurement sequence number; 8, 16 or 24 bits wide depending on format.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub measurement_sequence: Option<u32>,
    /// Whether the air-quality sensors have completed calibration.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub calibrated: Option<bool>,
    /// PM1.0 concentration in µg/m³.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub pm1: Option<f64>,
    /// PM2.5 concentration in µg/m³.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub pm25: Option<f64>,
    /// PM4.0 concentration in µg/m³.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub pm4: Option<f64>,
    /// PM10.0 concentration in µg/m³.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub pm10: Option<f64>,
    /// CO2 concentration in ppm.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub co2: Option<u16>,
    /// VOC index (unitless, 1-500 range).
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub voc_index: Option<u16>,
    /// NOX index (unitless, 1-500 range).
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub nox_index: Option<u16>,
    /// Luminosity in lux.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub luminosity: Option<f64>,
    /// Device MAC address, uppercase colon-separated hex octets. For Data
    /// Format 6 this may be the truncated 3-octet form until merged with the
    /// advertisement source's hardware address.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub mac_address: Option<String>,
}

impl DecodedSample {
    /// Create an empty sample for `format` with all instrument fields absent.
    ///
    /// The timestamp and signal strength are placeholders; the decoder
    /// overwrites them with the values carried by the raw payload.
    #[must_use]
    pub fn new(format: DataFormat) -> Self {
        Self {
            format,
            timestamp: OffsetDateTime::UNIX_EPOCH,
            signal_strength: 0.0,
            temperature: None,
            humidity: None,
            pressure: None,
            acceleration_x: None,
            acceleration_y: None,
            acceleration_z: None,
            battery_voltage: None,
            tx_power: None,
            movement_counter: None,
            measurement_sequence: None,
            calibrated: None,
            pm1: None,
            pm25: None,
            pm4: None,
            pm10: None,
            co2: None,
            voc_index: None,
            nox_index: None,
            luminosity: None,
            mac_address: None,
        }
    }
}

/// Known-device metadata supplied by an external registry.
///
/// Read-only from the pipeline's perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Device {
    /// MAC address of the device.
    pub mac_address: String,
    /// Stable device identifier, if assigned.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub device_id: Option<String>,
    /// Human-readable display name, if assigned.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub display_name: Option<String>,
}
