//! COVID-19 Exposure Notification frame decoder.
//!
//! The payload is encrypted at the source; both fields are passed through
//! opaquely. See the Exposure Notification Bluetooth specification v1.2.2.

use super::{BeaconFrame, IdentityProperties, PropertyValue};
use std::fmt;

/// Exposure Notification advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureNotificationFrame {
    /// 16-byte Rolling Proximity Identifier as lowercase hex
    pub identifier: String,
    /// 4 bytes of encrypted metadata (version info and transmission power)
    pub encrypted_metadata: [u8; 4],
}

impl ExposureNotificationFrame {
    pub fn properties(&self) -> IdentityProperties {
        IdentityProperties::new(vec![
            ("identifier", PropertyValue::from(self.identifier.clone())),
            (
                "encrypted_metadata",
                PropertyValue::from(hex::encode(self.encrypted_metadata)),
            ),
        ])
    }
}

impl fmt::Display for ExposureNotificationFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExposureNotificationFrame<identifier: {}>",
            self.identifier
        )
    }
}

/// Decode Exposure Notification service data (the bytes after the `6f fd`
/// UUID).
pub(crate) fn decode_service_data(data: &[u8]) -> Option<BeaconFrame> {
    if data.len() < 20 {
        return None;
    }
    let mut encrypted_metadata = [0u8; 4];
    encrypted_metadata.copy_from_slice(&data[16..20]);
    Some(BeaconFrame::ExposureNotification(
        ExposureNotificationFrame {
            identifier: hex::encode(&data[..16]),
            encrypted_metadata,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposure_service_data() -> Vec<u8> {
        vec![
            0x0d, 0x3b, 0x4f, 0x65, 0x58, 0x4c, 0x58, 0x21, 0x60, 0x57, 0x1d, 0xd1, 0x90, 0x10,
            0xd4, 0x1c, // rolling proximity identifier
            0x26, 0x60, 0xee, 0x34, // encrypted metadata
        ]
    }

    #[test]
    fn test_decode() {
        let BeaconFrame::ExposureNotification(frame) =
            decode_service_data(&exposure_service_data()).unwrap()
        else {
            panic!("expected exposure notification frame");
        };
        assert_eq!(frame.identifier, "0d3b4f65584c582160571dd19010d41c");
        assert_eq!(frame.encrypted_metadata, [0x26, 0x60, 0xee, 0x34]);
    }

    #[test]
    fn test_decode_too_short() {
        let mut data = exposure_service_data();
        data.truncate(19);
        assert_eq!(decode_service_data(&data), None);
    }

    #[test]
    fn test_properties() {
        let BeaconFrame::ExposureNotification(frame) =
            decode_service_data(&exposure_service_data()).unwrap()
        else {
            panic!("expected exposure notification frame");
        };
        let props = frame.properties();
        assert_eq!(
            props.get("identifier"),
            Some(&PropertyValue::from("0d3b4f65584c582160571dd19010d41c"))
        );
        assert_eq!(
            props.get("encrypted_metadata"),
            Some(&PropertyValue::from("2660ee34"))
        );
    }
}
