//! MAC address conversion between textual and numeric representations.
//!
//! RuuviTag payloads carry the device MAC on the wire, configuration files
//! spell it as text, and the batch scheduler keys per-device queues by it.
//! These helpers keep the two representations interchangeable: a 64-bit
//! integer holding the address in its low 6 bytes, and the canonical
//! uppercase colon-separated string.

use std::fmt;

use thiserror::Error;

/// Errors returned when parsing a MAC address string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MacParseError {
    /// The string was empty.
    #[error("MAC address is empty")]
    Empty,
    /// More than 8 byte groups were supplied.
    #[error("MAC address has {0} groups, at most 8 allowed")]
    TooManyGroups(usize),
    /// A group was not a valid hex byte.
    #[error("MAC address group '{0}' is not a valid hex byte")]
    InvalidGroup(String),
}

/// Format the low 6 bytes of `value` as an uppercase colon-separated MAC.
///
/// The address is interpreted big-endian: the most significant of the six
/// bytes comes first.
///
/// # Examples
///
/// ```
/// use ruuvi_types::format_mac;
///
/// assert_eq!(format_mac(0xCBB8_334C_884F), "CB:B8:33:4C:88:4F");
/// assert_eq!(format_mac(0x0000_0000_0001), "00:00:00:00:00:01");
/// ```
#[must_use]
pub fn format_mac(value: u64) -> String {
    let bytes = value.to_be_bytes();
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]
    )
}

/// Parse a MAC address string into its numeric form.
///
/// Accepts `:` and `-` as separators and between 1 and 8 hex-byte groups;
/// shorter addresses are treated as having leading zero bytes. Parsing is
/// case-insensitive.
///
/// # Examples
///
/// ```
/// use ruuvi_types::parse_mac;
///
/// assert_eq!(parse_mac("CB:B8:33:4C:88:4F").unwrap(), 0xCBB8_334C_884F);
/// assert_eq!(parse_mac("cb-b8-33-4c-88-4f").unwrap(), 0xCBB8_334C_884F);
/// assert_eq!(parse_mac("4F").unwrap(), 0x4F);
/// assert!(parse_mac("not a mac").is_err());
/// ```
pub fn parse_mac(s: &str) -> Result<u64, MacParseError> {
    if s.is_empty() {
        return Err(MacParseError::Empty);
    }

    let groups: Vec<&str> = s.split(['-', ':']).collect();
    if groups.len() > 8 {
        return Err(MacParseError::TooManyGroups(groups.len()));
    }

    let mut value: u64 = 0;
    for group in groups {
        if group.is_empty() || group.len() > 2 {
            return Err(MacParseError::InvalidGroup(group.to_string()));
        }
        let byte = u8::from_str_radix(group, 16)
            .map_err(|_| MacParseError::InvalidGroup(group.to_string()))?;
        value = (value << 8) | u64::from(byte);
    }

    Ok(value)
}

/// A hash/equality key for MAC address strings.
///
/// Two textual addresses compare equal when they parse to the same numeric
/// value, regardless of separator (`:` vs `-`) or letter case. Strings that
/// do not parse as MAC addresses fall back to case-insensitive ordinal
/// comparison. Hashing is consistent with this equality: parseable addresses
/// hash by their numeric value, everything else by the uppercased string.
///
/// # Examples
///
/// ```
/// use ruuvi_types::MacKey;
///
/// assert_eq!(MacKey::new("AA:BB:CC:DD:EE:FF"), MacKey::new("aa-bb-cc-dd-ee-ff"));
/// assert_ne!(MacKey::new("AA:BB:CC:DD:EE:FF"), MacKey::new("AA:BB:CC:DD:EE:00"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MacKey {
    /// Address parsed successfully; compared by numeric value.
    Numeric(u64),
    /// Unparseable string; compared case-insensitively.
    Text(String),
}

impl MacKey {
    /// Build a key from a textual address.
    #[must_use]
    pub fn new(address: &str) -> Self {
        match parse_mac(address) {
            Ok(value) => MacKey::Numeric(value),
            Err(_) => MacKey::Text(address.to_ascii_uppercase()),
        }
    }
}

impl From<&str> for MacKey {
    fn from(address: &str) -> Self {
        MacKey::new(address)
    }
}

impl fmt::Display for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacKey::Numeric(value) => write!(f, "{}", format_mac(*value)),
            MacKey::Text(text) => write!(f, "{}", text),
        }
    }
}
