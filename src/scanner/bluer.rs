//! BlueZ D-Bus backend.
//!
//! Registers an advertisement monitor matching Ruuvi manufacturer data and
//! emits a [`Frame`] with the device's current name and manufacturer data
//! every time BlueZ reports it. Requires the `bluetoothd` daemon.

use super::{FRAME_CHANNEL_BUFFER_SIZE, ScanError};
use crate::decoder::{Frame, RUUVI_MANUFACTURER_ID_BYTES};
use crate::mac_address::MacAddress;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
const MANUFACTURER_DATA_TYPE: u8 = 0xff;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

pub async fn start_scan() -> Result<mpsc::Receiver<Frame>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_BUFFER_SIZE);

    let pattern = Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: RUUVI_MANUFACTURER_ID_BYTES.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    tracing::info!(adapter = adapter.name(), "bluer scan started");

    tokio::spawn(async move {
        // Dropping the session or manager would end the scan.
        let _session = session;
        let _monitor_manager = monitor_manager;

        while let Some(event) = monitor_handle.next().await {
            if let MonitorEvent::DeviceFound(device_id) = event {
                match read_frame(&adapter, device_id.device).await {
                    Ok(Some(frame)) => {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(error = %e, "failed to read device properties"),
                }
            }
        }
        tracing::warn!("bluer monitor stream ended");
    });

    Ok(rx)
}

/// Snapshot the advertised properties of one device.
async fn read_frame(adapter: &Adapter, address: Address) -> Result<Option<Frame>, ScanError> {
    let device = adapter.device(address)?;

    let manufacturer_data: HashMap<u16, Vec<u8>> = match device.manufacturer_data().await? {
        Some(data) => data.into_iter().collect(),
        None => return Ok(None),
    };

    Ok(Some(Frame {
        address: MacAddress::from(address).identity(),
        name: device.name().await?,
        manufacturer_data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_to_identity() {
        let addr = Address([0xCA, 0xFE, 0xBA, 0xBE, 0x12, 0x34]);
        assert_eq!(MacAddress::from(addr).identity(), "CA:FE:BA:BE:12:34");
    }
}
