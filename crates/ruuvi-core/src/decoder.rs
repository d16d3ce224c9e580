//! Advertisement payload decoding for RuuviTag broadcasts.
//!
//! This module converts raw manufacturer-data bytes into a normalized
//! [`DecodedSample`]. Three wire formats are supported, selected by the first
//! byte of the payload:
//!
//! | Format | Discriminator | Length |
//! |--------|---------------|--------|
//! | RAWv2 | 0x05 | 24 bytes |
//! | Data Format 6 | 0x06 | 20 bytes |
//! | Extended V1 | 0xE1 | 40 bytes |
//!
//! All multi-byte instrument fields are big-endian on the wire. Every field
//! has a fixed sentinel pattern (all bits set, or the minimum-representable
//! value for signed fields) that decodes to `None` rather than a numeric
//! extreme; sentinel checks happen before any scale transform is applied.

use bytes::Buf;

use ruuvi_types::{DataFormat, DecodeError, DecodedSample, RawPayload};

/// Decode an advertisement payload into a normalized sample.
///
/// The format is selected by the payload's discriminator byte. Reception
/// metadata (timestamp, signal strength) is copied from the payload onto the
/// sample, and the truncated Data Format 6 MAC address is merged with the
/// payload's source hardware address when one is available.
pub fn decode(payload: &RawPayload) -> Result<DecodedSample, DecodeError> {
    let data = payload.data.as_ref();
    let Some(&discriminator) = data.first() else {
        return Err(DecodeError::InvalidLength {
            expected: 1,
            actual: 0,
        });
    };

    let mut sample = match DataFormat::try_from(discriminator)? {
        DataFormat::RawV2 => decode_raw_v2(data)?,
        DataFormat::DataFormat6 => {
            decode_data_format_6_with_source(data, payload.source_address)?
        }
        DataFormat::ExtendedV1 => decode_extended_v1(data)?,
    };

    sample.timestamp = payload.timestamp;
    sample.signal_strength = payload.signal_strength;
    Ok(sample)
}

/// Decode a payload, returning `None` on any decode failure.
///
/// Convenience for callers that treat malformed advertisements as noise.
#[must_use]
pub fn try_decode(payload: &RawPayload) -> Option<DecodedSample> {
    decode(payload).ok()
}

/// Decode a RAWv2 (0x05) payload.
///
/// Layout (24 bytes):
/// - byte 0: discriminator
/// - bytes 1-2: temperature (i16, 0.005 °C)
/// - bytes 3-4: humidity (u16, 0.0025 %)
/// - bytes 5-6: pressure (u16, +50000 Pa)
/// - bytes 7-12: acceleration x/y/z (i16 each, 0.001 g)
/// - bytes 13-14: power info (11-bit battery voltage + 5-bit tx power)
/// - byte 15: movement counter
/// - bytes 16-17: measurement sequence (u16)
/// - bytes 18-23: full MAC address
pub fn decode_raw_v2(data: &[u8]) -> Result<DecodedSample, DecodeError> {
    check_payload(data, DataFormat::RawV2)?;

    let mut buf = &data[1..];
    let mut sample = DecodedSample::new(DataFormat::RawV2);
    sample.temperature = temperature_from(buf.get_i16());
    sample.humidity = humidity_from(buf.get_u16());
    sample.pressure = pressure_from(buf.get_u16());
    sample.acceleration_x = acceleration_from(buf.get_i16());
    sample.acceleration_y = acceleration_from(buf.get_i16());
    sample.acceleration_z = acceleration_from(buf.get_i16());
    let power = buf.get_u16();
    sample.battery_voltage = battery_voltage_from(power);
    sample.tx_power = tx_power_from(power);
    sample.movement_counter = movement_counter_from(buf.get_u8());
    sample.measurement_sequence = sequence_from(u32::from(buf.get_u16()), 0xFFFF);
    sample.mac_address = mac_from(&data[18..24]);

    Ok(sample)
}

/// Decode a Data Format 6 (0x06) payload.
///
/// The compact air-quality broadcast. The MAC address carries only the low
/// 3 octets; use [`decode_data_format_6_with_source`] to merge it with the
/// advertising device's full hardware address.
///
/// Layout (20 bytes):
/// - byte 0: discriminator
/// - bytes 1-2: temperature (i16, 0.005 °C)
/// - bytes 3-4: humidity (u16, 0.0025 %)
/// - bytes 5-6: PM2.5 (u16, 0.1 µg/m³)
/// - bytes 7-8: CO2 (u16, ppm)
/// - byte 9: VOC index bits 8..1
/// - byte 10: NOX index bits 8..1
/// - byte 11: luminosity (8-bit logarithmic)
/// - byte 12: measurement sequence (u8)
/// - byte 13: flags (bit 0: calibration in progress, bit 6: VOC bit 0,
///   bit 7: NOX bit 0)
/// - bytes 14-16: reserved
/// - bytes 17-19: MAC address, low 3 octets
pub fn decode_data_format_6(data: &[u8]) -> Result<DecodedSample, DecodeError> {
    decode_data_format_6_with_source(data, None)
}

/// Decode a Data Format 6 payload, reconstructing the full MAC address from
/// the advertising device's hardware address when one is supplied.
pub fn decode_data_format_6_with_source(
    data: &[u8],
    source_address: Option<u64>,
) -> Result<DecodedSample, DecodeError> {
    check_payload(data, DataFormat::DataFormat6)?;

    let mut buf = &data[1..];
    let mut sample = DecodedSample::new(DataFormat::DataFormat6);
    sample.temperature = temperature_from(buf.get_i16());
    sample.humidity = humidity_from(buf.get_u16());
    sample.pm25 = pm_from(buf.get_u16());
    sample.co2 = co2_from(buf.get_u16());
    let voc_msb = buf.get_u8();
    let nox_msb = buf.get_u8();
    sample.luminosity = luminosity_log_from(buf.get_u8());
    sample.measurement_sequence = sequence_from(u32::from(buf.get_u8()), 0xFF);
    let flags = buf.get_u8();
    sample.voc_index = index_from(voc_msb, (flags >> 6) & 1);
    sample.nox_index = index_from(nox_msb, (flags >> 7) & 1);
    sample.calibrated = Some(flags & 0x01 == 0);

    let mac_bytes = &data[17..20];
    sample.mac_address = match (truncated_mac_value(mac_bytes), source_address) {
        (None, _) => None,
        (Some(low), Some(source)) => {
            // High 3 octets come from the hardware address, low 3 from the
            // payload.
            Some(ruuvi_types::format_mac(
                (source & 0xFFFF_FF00_0000) | low,
            ))
        }
        (Some(_), None) => mac_from(mac_bytes),
    };

    Ok(sample)
}

/// Decode an Extended V1 (0xE1) payload.
///
/// The extended-advertisement air-quality broadcast.
///
/// Layout (40 bytes):
/// - byte 0: discriminator
/// - bytes 1-2: temperature (i16, 0.005 °C)
/// - bytes 3-4: humidity (u16, 0.0025 %)
/// - bytes 5-12: PM1.0 / PM2.5 / PM4.0 / PM10.0 (u16 each, 0.1 µg/m³)
/// - bytes 13-14: CO2 (u16, ppm)
/// - byte 15: VOC index bits 8..1
/// - byte 16: NOX index bits 8..1
/// - bytes 17-19: luminosity (u24, 0.01 lux)
/// - bytes 20-21: sound level avg/peak (not surfaced)
/// - bytes 22-24: measurement sequence (u24)
/// - bytes 25-30: reserved
/// - byte 31: flags (bit 0: calibration in progress, bit 6: VOC bit 0,
///   bit 7: NOX bit 0)
/// - bytes 32-33: reserved
/// - bytes 34-39: full MAC address
pub fn decode_extended_v1(data: &[u8]) -> Result<DecodedSample, DecodeError> {
    check_payload(data, DataFormat::ExtendedV1)?;

    let mut buf = &data[1..];
    let mut sample = DecodedSample::new(DataFormat::ExtendedV1);
    sample.temperature = temperature_from(buf.get_i16());
    sample.humidity = humidity_from(buf.get_u16());
    sample.pm1 = pm_from(buf.get_u16());
    sample.pm25 = pm_from(buf.get_u16());
    sample.pm4 = pm_from(buf.get_u16());
    sample.pm10 = pm_from(buf.get_u16());
    sample.co2 = co2_from(buf.get_u16());
    let voc_msb = buf.get_u8();
    let nox_msb = buf.get_u8();
    sample.luminosity = luminosity_from(get_u24(&mut buf));
    let _sound_avg = buf.get_u8();
    let _sound_peak = buf.get_u8();
    sample.measurement_sequence = sequence_from(get_u24(&mut buf), 0xFF_FFFF);
    buf.advance(6); // reserved
    let flags = buf.get_u8();
    sample.voc_index = index_from(voc_msb, (flags >> 6) & 1);
    sample.nox_index = index_from(nox_msb, (flags >> 7) & 1);
    sample.calibrated = Some(flags & 0x01 == 0);
    sample.mac_address = mac_from(&data[34..40]);

    Ok(sample)
}

fn check_payload(data: &[u8], format: DataFormat) -> Result<(), DecodeError> {
    match data.first() {
        None => Err(DecodeError::InvalidLength {
            expected: format.payload_len(),
            actual: 0,
        }),
        Some(&byte) if byte != format as u8 => Err(DecodeError::FormatMismatch {
            expected: format,
            actual: byte,
        }),
        Some(_) if data.len() < format.payload_len() => Err(DecodeError::InvalidLength {
            expected: format.payload_len(),
            actual: data.len(),
        }),
        Some(_) => Ok(()),
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn temperature_from(raw: i16) -> Option<f64> {
    (raw != i16::MIN).then(|| round_to(f64::from(raw) * 0.005, 3))
}

fn humidity_from(raw: u16) -> Option<f64> {
    (raw != u16::MAX).then(|| round_to(f64::from(raw) * 0.0025, 4))
}

fn pressure_from(raw: u16) -> Option<f64> {
    (raw != u16::MAX).then(|| round_to((f64::from(raw) + 50_000.0) / 100.0, 2))
}

fn acceleration_from(raw: i16) -> Option<f64> {
    (raw != i16::MIN).then(|| round_to(f64::from(raw) * 0.001, 3))
}

// Power info packs an 11-bit battery voltage and a 5-bit tx power into one
// word; each half has its own sentinel.
fn battery_voltage_from(power: u16) -> Option<f64> {
    let raw = power >> 5;
    (raw != 2047).then(|| round_to((f64::from(raw) + 1600.0) * 0.001, 3))
}

fn tx_power_from(power: u16) -> Option<i16> {
    let raw = power & 0x1F;
    (raw != 31).then(|| -40 + 2 * raw as i16)
}

fn movement_counter_from(raw: u8) -> Option<u8> {
    (raw != u8::MAX).then_some(raw)
}

fn sequence_from(raw: u32, sentinel: u32) -> Option<u32> {
    (raw != sentinel).then_some(raw)
}

fn pm_from(raw: u16) -> Option<f64> {
    (raw != u16::MAX).then(|| round_to(f64::from(raw) * 0.1, 1))
}

fn co2_from(raw: u16) -> Option<u16> {
    (raw != u16::MAX).then_some(raw)
}

// VOC and NOX indexes are 9-bit: eight bits from their own byte, the lowest
// bit borrowed from the shared flags byte.
fn index_from(msb: u8, lsb: u8) -> Option<u16> {
    let raw = (u16::from(msb) << 1) | u16::from(lsb & 1);
    (raw != 0x1FF).then_some(raw)
}

fn luminosity_from(raw: u32) -> Option<f64> {
    (raw != 0xFF_FFFF).then(|| round_to(f64::from(raw) * 0.01, 2))
}

// The compact format compresses luminosity onto a log scale: the encoder
// stores round(ln(lux + 1) / delta) where delta = ln(65536) / 254, so the
// decoder maps byte c back to exp(c * delta) - 1.
fn luminosity_log_from(raw: u8) -> Option<f64> {
    if raw == u8::MAX {
        return None;
    }
    let delta = 65_536f64.ln() / 254.0;
    Some(round_to((f64::from(raw) * delta).exp() - 1.0, 2))
}

fn mac_from(bytes: &[u8]) -> Option<String> {
    if bytes.iter().all(|&b| b == 0xFF) {
        return None;
    }
    Some(
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

// Truncated 3-octet MAC as a numeric value, or None for the sentinel.
fn truncated_mac_value(bytes: &[u8]) -> Option<u64> {
    if bytes.iter().all(|&b| b == 0xFF) {
        return None;
    }
    Some(
        (u64::from(bytes[0]) << 16) | (u64::from(bytes[1]) << 8) | u64::from(bytes[2]),
    )
}

fn get_u24(buf: &mut &[u8]) -> u32 {
    let high = u32::from(buf.get_u8());
    let rest = u32::from(buf.get_u16());
    (high << 16) | rest
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_decode_raw_v2_reference_vector() {
        let data = hex("0512FC5394C37C0004FFFC040CAC364200CDCBB8334C884F");
        let sample = decode_raw_v2(&data).unwrap();

        assert_eq!(sample.format, DataFormat::RawV2);
        assert_eq!(sample.temperature, Some(24.3));
        assert_eq!(sample.humidity, Some(53.49));
        assert_eq!(sample.pressure, Some(1000.44));
        assert_eq!(sample.acceleration_x, Some(0.004));
        assert_eq!(sample.acceleration_y, Some(-0.004));
        assert_eq!(sample.acceleration_z, Some(1.036));
        assert_eq!(sample.battery_voltage, Some(2.977));
        assert_eq!(sample.tx_power, Some(4));
        assert_eq!(sample.movement_counter, Some(66));
        assert_eq!(sample.measurement_sequence, Some(205));
        assert_eq!(sample.mac_address.as_deref(), Some("CB:B8:33:4C:88:4F"));
    }

    #[test]
    fn test_decode_raw_v2_all_sentinels() {
        let data = hex("058000FFFFFFFF800080008000FFFFFFFFFFFFFFFFFFFFFF");
        let sample = decode_raw_v2(&data).unwrap();

        assert_eq!(sample.format, DataFormat::RawV2);
        assert_eq!(sample.temperature, None);
        assert_eq!(sample.humidity, None);
        assert_eq!(sample.pressure, None);
        assert_eq!(sample.acceleration_x, None);
        assert_eq!(sample.acceleration_y, None);
        assert_eq!(sample.acceleration_z, None);
        assert_eq!(sample.battery_voltage, None);
        assert_eq!(sample.tx_power, None);
        assert_eq!(sample.movement_counter, None);
        assert_eq!(sample.measurement_sequence, None);
        assert_eq!(sample.mac_address, None);
    }

    #[test]
    fn test_decode_data_format_6() {
        // temp 24.3, humidity 53.49, pm25 10.0, co2 600, voc 100, nox 1,
        // luminosity byte 127 (~255 lux), sequence 7, flags 0x80 (NOX lsb
        // set, calibration done), MAC low octets 4C:88:4F
        let data = hex("0612FC53940064025832007F07800000004C884F");
        assert_eq!(data.len(), 20);
        let sample = decode_data_format_6(&data).unwrap();

        assert_eq!(sample.format, DataFormat::DataFormat6);
        assert_eq!(sample.temperature, Some(24.3));
        assert_eq!(sample.humidity, Some(53.49));
        assert_eq!(sample.pm25, Some(10.0));
        assert_eq!(sample.co2, Some(600));
        assert_eq!(sample.voc_index, Some(100));
        assert_eq!(sample.nox_index, Some(1));
        assert_eq!(sample.luminosity, Some(255.0));
        assert_eq!(sample.measurement_sequence, Some(7));
        assert_eq!(sample.calibrated, Some(true));
        // Without a source address only the truncated form is available.
        assert_eq!(sample.mac_address.as_deref(), Some("4C:88:4F"));
        // Fields the compact format does not carry stay absent.
        assert_eq!(sample.pressure, None);
        assert_eq!(sample.acceleration_x, None);
        assert_eq!(sample.battery_voltage, None);
    }

    #[test]
    fn test_decode_data_format_6_merges_source_address() {
        let data = hex("0612FC53940064025832007F07800000004C884F");
        assert_eq!(data.len(), 20);
        let sample =
            decode_data_format_6_with_source(&data, Some(0xCBB8_334C_884F)).unwrap();
        assert_eq!(sample.mac_address.as_deref(), Some("CB:B8:33:4C:88:4F"));
    }

    #[test]
    fn test_decode_data_format_6_all_sentinels() {
        let data = hex("068000FFFFFFFFFFFFFFFFFFFFC1000000FFFFFF");
        assert_eq!(data.len(), 20);
        let sample = decode_data_format_6(&data).unwrap();

        assert_eq!(sample.temperature, None);
        assert_eq!(sample.humidity, None);
        assert_eq!(sample.pm25, None);
        assert_eq!(sample.co2, None);
        assert_eq!(sample.voc_index, None);
        assert_eq!(sample.nox_index, None);
        assert_eq!(sample.luminosity, None);
        assert_eq!(sample.measurement_sequence, None);
        assert_eq!(sample.mac_address, None);
        // The calibration flag is always derived; bit 0 set means still
        // calibrating.
        assert_eq!(sample.calibrated, Some(false));
    }

    #[test]
    fn test_decode_extended_v1() {
        let mut data = vec![0xE1];
        data.extend_from_slice(&hex("12FC5394")); // temp, humidity
        data.extend_from_slice(&hex("000A0014001E0028")); // pm1/pm25/pm4/pm10
        data.extend_from_slice(&hex("0258")); // co2
        data.extend_from_slice(&[0x32, 0x00]); // voc msb, nox msb
        data.extend_from_slice(&hex("002710")); // luminosity = 10000 -> 100.0
        data.extend_from_slice(&[0x00, 0x00]); // sound avg/peak
        data.extend_from_slice(&hex("000101")); // sequence = 257
        data.extend_from_slice(&[0x00; 6]); // reserved
        data.push(0x80); // flags: NOX lsb set, calibration done
        data.extend_from_slice(&[0x00; 2]); // reserved
        data.extend_from_slice(&hex("CBB8334C884F"));
        assert_eq!(data.len(), 40);

        let sample = decode_extended_v1(&data).unwrap();
        assert_eq!(sample.format, DataFormat::ExtendedV1);
        assert_eq!(sample.temperature, Some(24.3));
        assert_eq!(sample.humidity, Some(53.49));
        assert_eq!(sample.pm1, Some(1.0));
        assert_eq!(sample.pm25, Some(2.0));
        assert_eq!(sample.pm4, Some(3.0));
        assert_eq!(sample.pm10, Some(4.0));
        assert_eq!(sample.co2, Some(600));
        assert_eq!(sample.voc_index, Some(100));
        assert_eq!(sample.nox_index, Some(1));
        assert_eq!(sample.luminosity, Some(100.0));
        assert_eq!(sample.measurement_sequence, Some(257));
        assert_eq!(sample.calibrated, Some(true));
        assert_eq!(sample.mac_address.as_deref(), Some("CB:B8:33:4C:88:4F"));
    }

    #[test]
    fn test_decode_extended_v1_all_sentinels() {
        let mut data = vec![0xE1];
        data.extend_from_slice(&[0x80, 0x00]); // temperature sentinel
        data.extend_from_slice(&[0xFF; 12]); // humidity, pm x4, co2
        data.extend_from_slice(&[0xFF, 0xFF]); // voc msb, nox msb
        data.extend_from_slice(&[0xFF; 3]); // luminosity
        data.extend_from_slice(&[0x00, 0x00]); // sound
        data.extend_from_slice(&[0xFF; 3]); // sequence
        data.extend_from_slice(&[0x00; 6]); // reserved
        data.push(0xC0); // flags: VOC + NOX lsb set -> 511 sentinels
        data.extend_from_slice(&[0x00; 2]);
        data.extend_from_slice(&[0xFF; 6]); // MAC sentinel
        assert_eq!(data.len(), 40);

        let sample = decode_extended_v1(&data).unwrap();
        assert_eq!(sample.temperature, None);
        assert_eq!(sample.humidity, None);
        assert_eq!(sample.pm1, None);
        assert_eq!(sample.pm25, None);
        assert_eq!(sample.pm4, None);
        assert_eq!(sample.pm10, None);
        assert_eq!(sample.co2, None);
        assert_eq!(sample.voc_index, None);
        assert_eq!(sample.nox_index, None);
        assert_eq!(sample.luminosity, None);
        assert_eq!(sample.measurement_sequence, None);
        assert_eq!(sample.mac_address, None);
    }

    #[test]
    fn test_decode_copies_reception_metadata() {
        let timestamp = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let mut payload = RawPayload::new(
            hex("0512FC5394C37C0004FFFC040CAC364200CDCBB8334C884F"),
            -72.5,
        );
        payload.timestamp = timestamp;

        let sample = decode(&payload).unwrap();
        assert_eq!(sample.timestamp, timestamp);
        assert_eq!(sample.signal_strength, -72.5);
    }

    #[test]
    fn test_decode_unknown_format() {
        let payload = RawPayload::new(vec![0x03; 24], -60.0);
        assert_eq!(decode(&payload), Err(DecodeError::UnknownFormat(0x03)));
        assert!(try_decode(&payload).is_none());
    }

    #[test]
    fn test_decode_empty_payload() {
        let payload = RawPayload::new(Vec::new(), -60.0);
        assert!(matches!(
            decode(&payload),
            Err(DecodeError::InvalidLength { actual: 0, .. })
        ));
    }

    #[test]
    fn test_decode_short_payload() {
        let payload = RawPayload::new(vec![0x05; 10], -60.0);
        assert_eq!(
            decode(&payload),
            Err(DecodeError::InvalidLength {
                expected: 24,
                actual: 10
            })
        );
    }

    #[test]
    fn test_format_mismatch() {
        let data = hex("0612FC53940064025832007F07800000004C884F");
        assert_eq!(
            decode_raw_v2(&data),
            Err(DecodeError::FormatMismatch {
                expected: DataFormat::RawV2,
                actual: 0x06
            })
        );
    }

    #[test]
    fn test_tx_power_range() {
        // tx power raw 0 -> -40 dBm, raw 22 -> +4 dBm, raw 30 -> +20 dBm
        assert_eq!(tx_power_from(0x0000), Some(-40));
        assert_eq!(tx_power_from(0x0016), Some(4));
        assert_eq!(tx_power_from(0x001E), Some(20));
        assert_eq!(tx_power_from(0x001F), None);
    }

    #[test]
    fn test_luminosity_log_scale_endpoints() {
        // Encoded 0 is 0 lux; encoded 254 is the full-scale 65535 lux.
        assert_eq!(luminosity_log_from(0), Some(0.0));
        assert_eq!(luminosity_log_from(254), Some(65_535.0));
        assert_eq!(luminosity_log_from(255), None);
    }
}
