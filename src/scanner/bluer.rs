//! BlueZ D-Bus backend for beacon scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ hands us decomposed device properties rather than the raw advertising
//! payload, so the payload is reassembled into LTV elements before it enters
//! the pipeline.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, Advertisement, AdvertisementResult, ScanConfig,
            ScanError};
use crate::bt_addr::BtAddr;
use crate::packet::{
    CJ_COMPANY_ID, COMPLETE_LOCAL_NAME_TYPE, EDDYSTONE_UUID, ESTIMOTE_COMPANY_ID, ESTIMOTE_UUID,
    EXPOSURE_NOTIFICATION_UUID, FrameKind, IBEACON_COMPANY_ID, IBEACON_PROXIMITY_TYPE,
    MANUFACTURER_DATA_TYPE, SERVICE_DATA_TYPE,
};
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use tokio::sync::mpsc;

/// "Complete List of 16-bit Service UUIDs" AD type.
const SERVICE_UUIDS_TYPE: u8 = 0x03;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Advertising monitor patterns for the frame families of interest.
fn monitor_patterns(kinds: &[FrameKind]) -> Vec<Pattern> {
    let kinds: &[FrameKind] = if kinds.is_empty() { &FrameKind::ALL } else { kinds };

    let mut patterns: Vec<Pattern> = Vec::new();
    for kind in kinds {
        let (data_type, content): (u8, Vec<u8>) = match kind {
            FrameKind::EddystoneUid
            | FrameKind::EddystoneUrl
            | FrameKind::EddystoneTlm
            | FrameKind::EddystoneEncryptedTlm
            | FrameKind::EddystoneEid => (SERVICE_DATA_TYPE, EDDYSTONE_UUID.to_vec()),
            FrameKind::EstimoteTelemetryA | FrameKind::EstimoteTelemetryB => {
                (SERVICE_DATA_TYPE, ESTIMOTE_UUID.to_vec())
            }
            FrameKind::ExposureNotification => {
                (SERVICE_DATA_TYPE, EXPOSURE_NOTIFICATION_UUID.to_vec())
            }
            FrameKind::EstimoteNearable => (MANUFACTURER_DATA_TYPE, ESTIMOTE_COMPANY_ID.to_vec()),
            FrameKind::CjMonitor => (MANUFACTURER_DATA_TYPE, CJ_COMPANY_ID.to_vec()),
            FrameKind::IBeacon => {
                let mut content = IBEACON_COMPANY_ID.to_vec();
                content.extend_from_slice(&IBEACON_PROXIMITY_TYPE);
                (MANUFACTURER_DATA_TYPE, content)
            }
        };
        let duplicate = patterns
            .iter()
            .any(|p| p.data_type == data_type && p.content == content);
        if !duplicate {
            patterns.push(Pattern {
                data_type,
                start_position: 0,
                content,
            });
        }
    }
    patterns
}

/// Append one LTV element to a payload buffer. Oversized values are skipped,
/// an element length must fit a single byte.
fn push_element(payload: &mut Vec<u8>, type_tag: u8, parts: &[&[u8]]) {
    let value_len: usize = parts.iter().map(|part| part.len()).sum();
    if value_len + 1 > u8::MAX as usize {
        return;
    }
    payload.push((value_len + 1) as u8);
    payload.push(type_tag);
    for part in parts {
        payload.extend_from_slice(part);
    }
}

/// Start scanning for beacon advertisements using the BlueZ D-Bus backend.
///
/// This function initializes the Bluetooth adapter and registers an
/// advertising monitor for the configured frame families. Received
/// advertisements are sent through the returned channel. Runs indefinitely
/// until interrupted.
///
/// # Returns
/// A receiver for raw advertisements (or scan errors).
pub async fn start_scan(
    config: ScanConfig,
) -> Result<mpsc::Receiver<AdvertisementResult>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let patterns = monitor_patterns(&config.kinds);

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(patterns),
            ..Default::default()
        })
        .await?;

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        // Keep all Bluetooth state alive by moving it into this task
        let _session = session;
        let _monitor_manager = monitor_manager;

        while let Some(event) = monitor_handle.next().await {
            if let MonitorEvent::DeviceFound(device_id) = event
                && let Err(e) = process_device(&adapter, device_id.device, &tx).await
            {
                let _ = tx.send(Err(e)).await;
            }
        }
    });

    Ok(rx)
}

/// Reassemble the advertisement payload of a discovered device and forward it.
async fn process_device(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<AdvertisementResult>,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;
    let addr: BtAddr = address.into();

    let rssi = device.rssi().await?.unwrap_or(0);

    let mut payload = Vec::new();

    if let Some(service_data) = device.service_data().await? {
        for (uuid, data) in &service_data {
            // 16-bit service UUIDs sit at bytes 2-3 of the 128-bit form;
            // elements carry them little-endian
            let bytes = uuid.as_bytes();
            let short_uuid = [bytes[3], bytes[2]];
            push_element(&mut payload, SERVICE_UUIDS_TYPE, &[&short_uuid]);
            push_element(&mut payload, SERVICE_DATA_TYPE, &[&short_uuid, data]);
        }
    }

    if let Some(manufacturer_data) = device.manufacturer_data().await? {
        for (company_id, data) in &manufacturer_data {
            let id_bytes = company_id.to_le_bytes();
            push_element(&mut payload, MANUFACTURER_DATA_TYPE, &[&id_bytes, data]);
        }
    }

    if let Some(name) = device.name().await? {
        push_element(&mut payload, COMPLETE_LOCAL_NAME_TYPE, &[name.as_bytes()]);
    }

    if payload.is_empty() {
        return Ok(()); // nothing beacon-like on this device
    }

    let _ = tx
        .send(Ok(Advertisement {
            addr,
            rssi,
            payload,
        }))
        .await;

    Ok(())
}
