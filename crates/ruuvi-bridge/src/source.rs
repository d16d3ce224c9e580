//! BLE advertisement source backed by btleplug.
//!
//! Subscribes to the adapter's event stream and forwards every Ruuvi
//! manufacturer payload, along with the advertiser's hardware address and
//! RSSI, to the pipeline. No connections are ever established; everything
//! here is passive scanning.

use async_trait::async_trait;
use btleplug::api::{BDAddr, Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use ruuvi_core::{AdvertisementSource, Error, RawPayload, Result};

/// Ruuvi Innovations Ltd. Bluetooth SIG company identifier.
pub const RUUVI_MANUFACTURER_ID: u16 = 0x0499;

const CHANNEL_CAPACITY: usize = 256;

/// Passive BLE scanner that emits Ruuvi manufacturer payloads.
pub struct BleSource {
    adapter_index: usize,
}

impl BleSource {
    /// Create a source using the adapter at the given index.
    #[must_use]
    pub fn new(adapter_index: usize) -> Self {
        Self { adapter_index }
    }

    async fn adapter(&self) -> Result<Adapter> {
        let manager = Manager::new().await.map_err(Error::source)?;
        let adapters = manager.adapters().await.map_err(Error::source)?;
        let count = adapters.len();
        adapters
            .into_iter()
            .nth(self.adapter_index)
            .ok_or_else(|| {
                Error::source(format!(
                    "no Bluetooth adapter at index {} ({count} available)",
                    self.adapter_index
                ))
            })
    }
}

#[async_trait]
impl AdvertisementSource for BleSource {
    async fn subscribe(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<RawPayload>> {
        let adapter = self.adapter().await?;
        let mut events = adapter.events().await.map_err(Error::source)?;
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::source)?;
        info!("BLE scan started");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("scan cancelled, stopping");
                        break;
                    }
                    event = events.next() => {
                        let Some(event) = event else {
                            warn!("adapter event stream ended");
                            break;
                        };
                        let CentralEvent::ManufacturerDataAdvertisement { id, manufacturer_data } =
                            event
                        else {
                            continue;
                        };
                        let Some(data) = manufacturer_data.get(&RUUVI_MANUFACTURER_ID) else {
                            continue;
                        };

                        // Hardware address and RSSI live on the peripheral,
                        // not the event.
                        let (address, rssi) = match adapter.peripheral(&id).await {
                            Ok(peripheral) => match peripheral.properties().await {
                                Ok(Some(props)) => (Some(props.address), props.rssi),
                                _ => (None, None),
                            },
                            Err(err) => {
                                trace!(error = %err, "peripheral lookup failed");
                                (None, None)
                            }
                        };

                        let mut payload =
                            RawPayload::new(Bytes::copy_from_slice(data), f64::from(rssi.unwrap_or(0)));
                        if let Some(address) = address {
                            payload = payload.with_source_address(address_to_u64(address));
                        }

                        if tx.send(payload).await.is_err() {
                            debug!("payload receiver dropped, stopping scan");
                            break;
                        }
                    }
                }
            }
            if let Err(err) = adapter.stop_scan().await {
                warn!(error = %err, "failed to stop BLE scan");
            } else {
                info!("BLE scan stopped");
            }
        });

        Ok(rx)
    }
}

fn address_to_u64(address: BDAddr) -> u64 {
    address
        .into_inner()
        .iter()
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte))
}
