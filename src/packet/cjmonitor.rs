//! Control-J Monitor environmental beacon decoder.

use super::{BeaconFrame, IdentityProperties, PropertyValue};
use std::fmt;

/// Beacon type discriminant for the temperature/humidity/light monitor.
const CJ_TEMPHUM_TYPE: u16 = 0x10fe;

/// Control-J Monitor advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct CjMonitorAdvertisement {
    /// Device name from the Complete Local Name element
    pub name: String,
    /// Temperature in degrees Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: u8,
    /// Light level in lux
    pub light: f64,
    /// Company identifier
    pub company_id: u16,
    /// Beacon type discriminant
    pub beacon_type: u16,
}

impl CjMonitorAdvertisement {
    pub fn properties(&self) -> IdentityProperties {
        IdentityProperties::new(vec![
            ("name", PropertyValue::from(self.name.clone())),
            ("temperature", PropertyValue::from(self.temperature)),
            ("humidity", PropertyValue::from(i64::from(self.humidity))),
            ("light", PropertyValue::from(self.light)),
            ("company_id", PropertyValue::from(i64::from(self.company_id))),
            ("beacon_type", PropertyValue::from(i64::from(self.beacon_type))),
        ])
    }
}

impl fmt::Display for CjMonitorAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CjMonitorAdvertisement<name: {}, temp: {:.1}, humidity: {}, light: {:.0}>",
            self.name, self.temperature, self.humidity, self.light
        )
    }
}

/// Expand a µ-law compressed light reading to a linear value.
fn mulaw_to_value(mudata: u8) -> u32 {
    let position = u32::from((mudata & 0xf0) >> 4) + 5;
    ((1 << position) | (u32::from(mudata & 0x0f) << (position - 4)) | (1 << (position - 5))) - 33
}

/// Decode Control-J manufacturer data (the bytes after the `72 04` company
/// id). The device name lives in a sibling Complete Local Name element and
/// must be present for the advertisement to be complete.
pub(crate) fn decode(data: &[u8], local_name: Option<&[u8]>) -> Option<BeaconFrame> {
    if data.len() < 6 {
        return None;
    }
    let beacon_type = u16::from_le_bytes([data[0], data[1]]);
    if beacon_type != CJ_TEMPHUM_TYPE {
        return None;
    }

    let name = local_name?;
    if !name.is_ascii() {
        return None;
    }

    Some(BeaconFrame::CjMonitor(CjMonitorAdvertisement {
        name: String::from_utf8_lossy(name).into_owned(),
        temperature: f64::from(u16::from_le_bytes([data[2], data[3]])) / 100.0,
        humidity: data[4],
        light: f64::from(mulaw_to_value(data[5])) / 10.0,
        company_id: 0x0472,
        beacon_type,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cj_manufacturer_data() -> Vec<u8> {
        vec![
            0xfe, 0x10, // beacon type
            0xbc, 0x0c, // temperature 32.60 C
            0x37, // humidity 55 %
            0x59, // light, mu-law compressed
        ]
    }

    #[test]
    fn test_decode() {
        let frame = decode(&cj_manufacturer_data(), Some(b"Mon 5643")).unwrap();
        let BeaconFrame::CjMonitor(monitor) = frame else {
            panic!("expected CJ Monitor frame");
        };
        assert_eq!(monitor.name, "Mon 5643");
        assert!((monitor.temperature - 32.6).abs() < 1e-9);
        assert_eq!(monitor.humidity, 55);
        assert!((monitor.light - 159.9).abs() < 1e-9);
        assert_eq!(monitor.company_id, 0x0472);
        assert_eq!(monitor.beacon_type, 0x10fe);
    }

    #[test]
    fn test_decode_unknown_beacon_type() {
        let mut data = cj_manufacturer_data();
        data[0] = 0xff; // beacon type 0x10ff
        assert_eq!(decode(&data, Some(b"Mon 5643")), None);
    }

    #[test]
    fn test_decode_missing_name() {
        assert_eq!(decode(&cj_manufacturer_data(), None), None);
    }

    #[test]
    fn test_decode_non_ascii_name() {
        assert_eq!(decode(&cj_manufacturer_data(), Some(&[0x4d, 0xc3, 0xa9])), None);
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(decode(&[0xfe, 0x10, 0xbc], Some(b"Mon")), None);
    }

    #[test]
    fn test_mulaw_expansion() {
        // 0x59: position 10 -> (1024 | 576 | 32) - 33 = 1599
        assert_eq!(mulaw_to_value(0x59), 1599);
        assert_eq!(mulaw_to_value(0x00), (32 | 0 | 1) - 33);
    }

    #[test]
    fn test_mulaw_monotonic() {
        let mut previous = 0;
        for byte in 0..=0xffu8 {
            let value = mulaw_to_value(byte);
            assert!(value >= previous, "not monotonic at {byte:#x}");
            previous = value;
        }
    }

    #[test]
    fn test_display() {
        let BeaconFrame::CjMonitor(monitor) =
            decode(&cj_manufacturer_data(), Some(b"Mon 5643")).unwrap()
        else {
            panic!("expected CJ Monitor frame");
        };
        assert_eq!(
            format!("{}", monitor),
            "CjMonitorAdvertisement<name: Mon 5643, temp: 32.6, humidity: 55, light: 160>"
        );
    }
}
