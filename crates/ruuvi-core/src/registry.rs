//! Known-device registry and the resolver seam the pipeline depends on.

use std::collections::HashMap;

use ruuvi_types::{Device, MacKey};

/// Maps a MAC address to optional known-device metadata.
///
/// The pipeline depends on this abstraction only; where the registry data
/// comes from (configuration, a file, a remote service) is the host's
/// concern.
pub trait DeviceResolver: Send + Sync {
    /// Look up a device by MAC address. Returns `None` for unknown devices.
    fn lookup(&self, mac: &str) -> Option<Device>;
}

/// In-memory device registry keyed by MAC address.
///
/// Lookups are insensitive to letter case and separator style, so a device
/// registered as `AA:BB:CC:DD:EE:FF` is found for `aa-bb-cc-dd-ee-ff`.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<MacKey, Device>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of devices.
    #[must_use]
    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let mut registry = Self::new();
        for device in devices {
            registry.insert(device);
        }
        registry
    }

    /// Register a device, replacing any existing entry for the same address.
    pub fn insert(&mut self, device: Device) {
        self.devices
            .insert(MacKey::new(&device.mac_address), device);
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl DeviceResolver for DeviceRegistry {
    fn lookup(&self, mac: &str) -> Option<Device> {
        self.devices.get(&MacKey::new(mac)).cloned()
    }
}
