//! iBeacon advertisement decoder.

use super::{BeaconFrame, IBEACON_PROXIMITY_TYPE, IdentityProperties, PropertyValue};
use std::fmt;

/// iBeacon proximity advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct IBeaconAdvertisement {
    /// 16-byte proximity UUID in canonical 8-4-4-4-12 form
    pub uuid: String,
    /// 2-byte major identifier
    pub major: u16,
    /// 2-byte minor identifier
    pub minor: u16,
    /// Calibrated Tx power at 1 m, in dBm
    pub tx_power: i8,
}

impl IBeaconAdvertisement {
    /// Cypress iBeacon sensor temperature in degrees Celsius.
    ///
    /// Cypress sensor beacons pack readings into the minor field; this is a
    /// derived interpretation, not a separate frame family.
    pub fn cypress_temperature(&self) -> f64 {
        175.72 * f64::from(self.minor & 0xff) * 256.0 / 65536.0 - 46.85
    }

    /// Cypress iBeacon sensor relative humidity in percent.
    pub fn cypress_humidity(&self) -> f64 {
        125.0 * f64::from(self.minor & 0xff00) / 65536.0 - 6.0
    }

    pub fn properties(&self) -> IdentityProperties {
        IdentityProperties::new(vec![
            ("uuid", PropertyValue::from(self.uuid.clone())),
            ("major", PropertyValue::from(i64::from(self.major))),
            ("minor", PropertyValue::from(i64::from(self.minor))),
        ])
    }
}

impl fmt::Display for IBeaconAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IBeaconAdvertisement<tx_power: {}, uuid: {}, major: {}, minor: {}>",
            self.tx_power, self.uuid, self.major, self.minor
        )
    }
}

/// Render 16 raw bytes in the canonical iBeacon UUID form.
fn format_uuid(bytes: &[u8]) -> String {
    let hex = hex::encode(bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Decode iBeacon manufacturer data (the bytes after the `4c 00` company id).
pub(crate) fn decode_manufacturer_data(data: &[u8]) -> Option<BeaconFrame> {
    // beacon type + uuid + major + minor + tx power
    let beacon_type = data.get(..2)?;
    if beacon_type != IBEACON_PROXIMITY_TYPE {
        return None;
    }
    let body = &data[2..];
    if body.len() < 21 {
        return None;
    }

    Some(BeaconFrame::IBeacon(IBeaconAdvertisement {
        uuid: format_uuid(&body[..16]),
        major: u16::from_be_bytes([body[16], body[17]]),
        minor: u16::from_be_bytes([body[18], body[19]]),
        tx_power: body[20] as i8,
    }))
}
