//! Estimote telemetry and Nearable frame decoders.
//!
//! Telemetry frames come as two alternating subframes (A: motion, B:
//! environment) sharing an 8-byte identifier and a protocol version packed
//! into the high nibble of the frame type byte. Several fields are only
//! present for specific protocol versions.

use super::{BeaconFrame, IdentityProperties, PropertyValue};
use std::fmt;

/// Telemetry frame discriminant in the low nibble of the frame type byte.
const TELEMETRY_FRAME: u8 = 0x02;
/// Highest known telemetry protocol version.
const MAX_PROTOCOL_VERSION: u8 = 2;

const SUBFRAME_A: u8 = 0x00;
const SUBFRAME_B: u8 = 0x01;

/// Nearable frame discriminant, first manufacturer data byte after the
/// company id.
const NEARABLE_FRAME: u8 = 0x01;

/// Estimote telemetry subframe A: motion.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimoteTelemetryA {
    /// First half of the beacon identifier as lowercase hex (8 bytes)
    pub identifier: String,
    /// Telemetry protocol version (0-2)
    pub protocol_version: u8,
    /// Acceleration for (X, Y, Z) axis, in g
    pub acceleration: (f64, f64, f64),
    /// Duration of the previous motion state, in seconds
    pub previous_motion_state: u32,
    /// Duration of the current motion state, in seconds
    pub current_motion_state: u32,
    /// Whether the beacon is in motion at the moment
    pub is_moving: bool,
    /// State of GPIO pins 0-3 (true is high)
    pub gpio_states: [bool; 4],
    /// Firmware problem flag, protocol version >= 1 only
    pub has_firmware_error: Option<bool>,
    /// Clock problem flag, protocol version >= 1 only
    pub has_clock_error: Option<bool>,
    /// Atmospheric pressure in Pascal, protocol version 2 only and absent
    /// when the sensor reports all-ones
    pub pressure: Option<f64>,
}

impl EstimoteTelemetryA {
    pub fn properties(&self) -> IdentityProperties {
        telemetry_properties(&self.identifier, self.protocol_version)
    }
}

impl fmt::Display for EstimoteTelemetryA {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EstimoteTelemetryA<identifier: {}, protocol_version: {}>",
            self.identifier, self.protocol_version
        )
    }
}

/// Estimote telemetry subframe B: environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimoteTelemetryB {
    /// First half of the beacon identifier as lowercase hex (8 bytes)
    pub identifier: String,
    /// Telemetry protocol version (0-2)
    pub protocol_version: u8,
    /// Magnetic field for (X, Y, Z) axis, between -1 and 1, absent when the
    /// sensor reports all-ones
    pub magnetic_field: Option<(f64, f64, f64)>,
    /// Ambient light in lux, absent when the sensor reports all-ones
    pub ambient_light: Option<f64>,
    /// Uptime in seconds
    pub uptime: u32,
    /// Ambient temperature in degrees Celsius
    pub temperature: f64,
    /// Battery voltage in mV, absent when the sensor reports all-ones
    pub voltage: Option<u16>,
    /// Battery level 0-100, protocol version >= 1 only
    pub battery_level: Option<u8>,
    /// Firmware problem flag, protocol version 0 only
    pub has_firmware_error: Option<bool>,
    /// Clock problem flag, protocol version 0 only
    pub has_clock_error: Option<bool>,
}

impl EstimoteTelemetryB {
    pub fn properties(&self) -> IdentityProperties {
        telemetry_properties(&self.identifier, self.protocol_version)
    }
}

impl fmt::Display for EstimoteTelemetryB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EstimoteTelemetryB<identifier: {}, protocol_version: {}>",
            self.identifier, self.protocol_version
        )
    }
}

/// Estimote Nearable sticker advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimoteNearable {
    /// Nearable identifier as lowercase hex (8 bytes)
    pub identifier: String,
    /// Hardware version
    pub hardware_version: u8,
    /// Firmware version
    pub firmware_version: u8,
    /// Temperature in degrees Celsius
    pub temperature: f64,
    /// Whether the sticker is in motion at the moment
    pub is_moving: bool,
}

impl EstimoteNearable {
    pub fn properties(&self) -> IdentityProperties {
        IdentityProperties::new(vec![
            ("identifier", PropertyValue::from(self.identifier.clone())),
            ("temperature", PropertyValue::from(self.temperature)),
            ("is_moving", PropertyValue::from(self.is_moving)),
        ])
    }
}

impl fmt::Display for EstimoteNearable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EstimoteNearable<identifier: {}>", self.identifier)
    }
}

fn telemetry_properties(identifier: &str, protocol_version: u8) -> IdentityProperties {
    IdentityProperties::new(vec![
        ("identifier", PropertyValue::from(identifier)),
        (
            "protocol_version",
            PropertyValue::from(i64::from(protocol_version)),
        ),
    ])
}

/// Convert a motion state byte to seconds.
///
/// The low 6 bits are the magnitude, the top 2 bits select the unit. Unit 3
/// splits on the magnitude: below 32 it counts days, from 32 on the magnitude
/// is offset by 32 and counts weeks.
fn parse_motion_state(value: u8) -> u32 {
    let magnitude = u32::from(value & 0b0011_1111);
    match (value & 0b1100_0000) >> 6 {
        1 => magnitude * 60,
        2 => magnitude * 60 * 60,
        3 if magnitude < 32 => magnitude * 60 * 60 * 24,
        3 => (magnitude - 32) * 60 * 60 * 24 * 7,
        _ => magnitude,
    }
}

/// Reconstruct a signed value from a 12-bit two's complement reading.
fn signed_12bit(raw: u16) -> i16 {
    let raw = raw & 0x0fff;
    if raw > 2047 { raw as i16 - 4096 } else { raw as i16 }
}

/// Decode Estimote telemetry service data (the bytes after the `9a fe` UUID).
pub(crate) fn decode_service_data(data: &[u8]) -> Option<BeaconFrame> {
    let (&frame_type, rest) = data.split_first()?;
    if frame_type & 0x0f != TELEMETRY_FRAME {
        return None;
    }
    let protocol_version = (frame_type & 0xf0) >> 4;
    if protocol_version > MAX_PROTOCOL_VERSION {
        return None;
    }
    if rest.len() < 19 {
        return None;
    }

    let identifier = hex::encode(&rest[..8]);
    let subframe_type = rest[8];
    let body = &rest[9..19];

    match subframe_type {
        SUBFRAME_A => Some(decode_subframe_a(identifier, protocol_version, body)),
        SUBFRAME_B => Some(decode_subframe_b(identifier, protocol_version, body)),
        _ => None,
    }
}

fn decode_subframe_a(identifier: String, protocol_version: u8, body: &[u8]) -> BeaconFrame {
    let acceleration = (
        f64::from(body[0] as i8) * 2.0 / 127.0,
        f64::from(body[1] as i8) * 2.0 / 127.0,
        f64::from(body[2] as i8) * 2.0 / 127.0,
    );
    let previous_motion_state = parse_motion_state(body[3]);
    let current_motion_state = parse_motion_state(body[4]);

    let combined = &body[5..10];
    let is_moving = combined[0] & 0b0000_0011 == 1;
    let mut gpio_states = [false; 4];
    for (pin, state) in gpio_states.iter_mut().enumerate() {
        *state = combined[0] & (1 << (4 + pin)) != 0;
    }

    let (has_firmware_error, has_clock_error) = match protocol_version {
        2 => (
            Some((combined[0] & 0b0000_0100) >> 2 == 1),
            Some((combined[0] & 0b0000_1000) >> 3 == 1),
        ),
        1 => (
            Some(combined[1] & 0b0000_0001 == 1),
            Some((combined[1] & 0b0000_0010) >> 1 == 1),
        ),
        _ => (None, None),
    };

    let pressure = if protocol_version == 2 {
        let raw = u32::from_le_bytes([combined[1], combined[2], combined[3], combined[4]]);
        if raw == u32::MAX {
            None
        } else {
            Some(f64::from(raw) / 256.0)
        }
    } else {
        None
    };

    BeaconFrame::EstimoteTelemetryA(EstimoteTelemetryA {
        identifier,
        protocol_version,
        acceleration,
        previous_motion_state,
        current_motion_state,
        is_moving,
        gpio_states,
        has_firmware_error,
        has_clock_error,
        pressure,
    })
}

fn decode_subframe_b(identifier: String, protocol_version: u8, body: &[u8]) -> BeaconFrame {
    let magnetic_field = if body[0] == 0xff && body[1] == 0xff && body[2] == 0xff {
        None
    } else {
        Some((
            f64::from(body[0] as i8) / 128.0,
            f64::from(body[1] as i8) / 128.0,
            f64::from(body[2] as i8) / 128.0,
        ))
    };

    let ambient_upper = (body[3] & 0xf0) >> 4;
    let ambient_lower = body[3] & 0x0f;
    let ambient_light = if ambient_upper == 0xf && ambient_lower == 0xf {
        None
    } else {
        Some(f64::from(1u32 << ambient_upper) * f64::from(ambient_lower) * 0.72)
    };

    let combined = &body[4..9];
    let uptime_magnitude = (u32::from(combined[1] & 0b0000_1111) << 8) | u32::from(combined[0]);
    let uptime = match (combined[1] & 0b0011_0000) >> 4 {
        1 => uptime_magnitude * 60,
        2 => uptime_magnitude * 60 * 60,
        3 => uptime_magnitude * 60 * 60 * 24,
        _ => uptime_magnitude,
    };

    let temperature_raw = (u16::from(combined[3] & 0b0000_0011) << 10)
        | (u16::from(combined[2]) << 2)
        | (u16::from(combined[1] & 0b1100_0000) >> 6);
    let temperature = f64::from(signed_12bit(temperature_raw)) / 16.0;

    let voltage_raw = (u16::from(combined[4]) << 6) | (u16::from(combined[3] & 0b1111_1100) >> 2);
    let voltage = if voltage_raw == 0b0011_1111_1111_1111 {
        None
    } else {
        Some(voltage_raw)
    };

    let trailing = body[9];
    let (battery_level, has_firmware_error, has_clock_error) = if protocol_version == 0 {
        (
            None,
            Some(trailing & 0b0000_0001 == 1),
            Some(trailing & 0b0000_0010 == 0b10),
        )
    } else {
        let level = if trailing == 0xff { None } else { Some(trailing) };
        (level, None, None)
    };

    BeaconFrame::EstimoteTelemetryB(EstimoteTelemetryB {
        identifier,
        protocol_version,
        magnetic_field,
        ambient_light,
        uptime,
        temperature,
        voltage,
        battery_level,
        has_firmware_error,
        has_clock_error,
    })
}

/// Decode Estimote manufacturer data (the bytes after the `5d 01` company
/// id). Only Nearable frames are carried this way.
pub(crate) fn decode_manufacturer_data(data: &[u8]) -> Option<BeaconFrame> {
    let (&frame_type, rest) = data.split_first()?;
    if frame_type != NEARABLE_FRAME || rest.len() < 13 {
        return None;
    }

    let raw_temperature = u16::from_le_bytes([rest[10], rest[11]]);
    Some(BeaconFrame::EstimoteNearable(EstimoteNearable {
        identifier: hex::encode(&rest[..8]),
        hardware_version: rest[8],
        firmware_version: rest[9],
        temperature: f64::from(signed_12bit(raw_temperature)) / 16.0,
        is_moving: rest[12] & 0b0100_0000 != 0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry_a_service_data() -> Vec<u8> {
        vec![
            0x12, // telemetry frame, protocol version 1
            0x47, 0xa0, 0x38, 0xd5, 0xeb, 0x03, 0x26, 0x40, // identifier
            0x00, // subframe A
            0x00, 0x01, 0x41, // acceleration
            0x44, 0x47, // previous/current motion state
            0xf0, 0x01, 0x00, 0x00, 0x00, // combined fields
        ]
    }

    fn telemetry_b_service_data() -> Vec<u8> {
        vec![
            0x22, // telemetry frame, protocol version 2
            0x47, 0xa0, 0x38, 0xd5, 0xeb, 0x03, 0x26, 0x40, // identifier
            0x01, // subframe B
            0xff, 0xff, 0xff, // magnetic field (absent)
            0xff, // ambient light (absent)
            0x49, 0x25, 0x66, 0xbc, 0x2e, // combined fields
            0x50, // battery level
        ]
    }

    #[test]
    fn test_decode_subframe_a() {
        let BeaconFrame::EstimoteTelemetryA(frame) =
            decode_service_data(&telemetry_a_service_data()).unwrap()
        else {
            panic!("expected telemetry A frame");
        };
        assert_eq!(frame.identifier, "47a038d5eb032640");
        assert_eq!(frame.protocol_version, 1);
        assert!((frame.acceleration.0 - 0.0).abs() < 1e-9);
        assert!((frame.acceleration.1 - 2.0 / 127.0).abs() < 1e-9);
        assert!((frame.acceleration.2 - 130.0 / 127.0).abs() < 1e-9);
        assert_eq!(frame.previous_motion_state, 240); // 4 minutes
        assert_eq!(frame.current_motion_state, 420); // 7 minutes
        assert!(!frame.is_moving);
        assert_eq!(frame.gpio_states, [true, true, true, true]);
        assert_eq!(frame.has_firmware_error, Some(true));
        assert_eq!(frame.has_clock_error, Some(false));
        assert_eq!(frame.pressure, None);
    }

    #[test]
    fn test_decode_subframe_a_version_2_pressure() {
        let mut data = telemetry_a_service_data();
        data[0] = 0x22;
        // combined[1..5] little-endian pressure
        data[16] = 0x00;
        data[17] = 0x84;
        data[18] = 0x03;
        data[19] = 0x00;
        let BeaconFrame::EstimoteTelemetryA(frame) = decode_service_data(&data).unwrap() else {
            panic!("expected telemetry A frame");
        };
        // 0x00038400 / 256.0
        assert_eq!(frame.pressure, Some(900.0));
        // version 2 error bits come from combined[0]
        assert_eq!(frame.has_firmware_error, Some(false));
        assert_eq!(frame.has_clock_error, Some(false));
    }

    #[test]
    fn test_decode_subframe_a_version_0_has_no_optional_fields() {
        let mut data = telemetry_a_service_data();
        data[0] = 0x02;
        let BeaconFrame::EstimoteTelemetryA(frame) = decode_service_data(&data).unwrap() else {
            panic!("expected telemetry A frame");
        };
        assert_eq!(frame.has_firmware_error, None);
        assert_eq!(frame.has_clock_error, None);
        assert_eq!(frame.pressure, None);
    }

    #[test]
    fn test_motion_state_units() {
        assert_eq!(parse_motion_state(0x00), 0);
        assert_eq!(parse_motion_state(0x40), 0); // unit minutes, magnitude 0
        assert_eq!(parse_motion_state(0x05), 5); // seconds
        assert_eq!(parse_motion_state(0x45), 300); // 5 minutes
        assert_eq!(parse_motion_state(0x85), 18_000); // 5 hours
        assert_eq!(parse_motion_state(0xc0 | 31), 31 * 86_400); // 31 days
        assert_eq!(parse_motion_state(0xc0 | 32), 0); // 0 weeks
        assert_eq!(parse_motion_state(0xc0 | 33), 604_800); // 1 week
    }

    #[test]
    fn test_motion_state_unit_boundary_exact_at_32() {
        let days = parse_motion_state(0xc0 | 31);
        let weeks = parse_motion_state(0xc0 | 63);
        assert_eq!(days, 31 * 86_400);
        assert_eq!(weeks, 31 * 604_800);
    }

    #[test]
    fn test_decode_subframe_b() {
        let BeaconFrame::EstimoteTelemetryB(frame) =
            decode_service_data(&telemetry_b_service_data()).unwrap()
        else {
            panic!("expected telemetry B frame");
        };
        assert_eq!(frame.identifier, "47a038d5eb032640");
        assert_eq!(frame.protocol_version, 2);
        assert_eq!(frame.magnetic_field, None);
        assert_eq!(frame.ambient_light, None);
        assert_eq!(frame.uptime, 1353 * 3600);
        assert!((frame.temperature - 25.5).abs() < 1e-9);
        assert_eq!(frame.voltage, Some(2991));
        assert_eq!(frame.battery_level, Some(80));
        assert_eq!(frame.has_firmware_error, None);
        assert_eq!(frame.has_clock_error, None);
    }

    #[test]
    fn test_decode_subframe_b_version_0_error_bits() {
        let mut data = telemetry_b_service_data();
        data[0] = 0x02;
        data[19] = 0b0000_0011;
        let BeaconFrame::EstimoteTelemetryB(frame) = decode_service_data(&data).unwrap() else {
            panic!("expected telemetry B frame");
        };
        assert_eq!(frame.battery_level, None);
        assert_eq!(frame.has_firmware_error, Some(true));
        assert_eq!(frame.has_clock_error, Some(true));
    }

    #[test]
    fn test_decode_subframe_b_magnetic_field_present() {
        let mut data = telemetry_b_service_data();
        data[10] = 0x00;
        data[11] = 0x40;
        data[12] = 0xc0; // -64
        let BeaconFrame::EstimoteTelemetryB(frame) = decode_service_data(&data).unwrap() else {
            panic!("expected telemetry B frame");
        };
        let (x, y, z) = frame.magnetic_field.unwrap();
        assert!((x - 0.0).abs() < 1e-9);
        assert!((y - 0.5).abs() < 1e-9);
        assert!((z + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_decode_subframe_b_ambient_light() {
        let mut data = telemetry_b_service_data();
        data[13] = 0x35; // 2^3 * 5 * 0.72 = 28.8
        let BeaconFrame::EstimoteTelemetryB(frame) = decode_service_data(&data).unwrap() else {
            panic!("expected telemetry B frame");
        };
        assert!((frame.ambient_light.unwrap() - 28.8).abs() < 1e-9);
    }

    #[test]
    fn test_decode_rejects_unknown_protocol_version() {
        let mut data = telemetry_a_service_data();
        data[0] = 0x32; // version 3
        assert_eq!(decode_service_data(&data), None);
    }

    #[test]
    fn test_decode_rejects_unknown_subframe() {
        let mut data = telemetry_a_service_data();
        data[9] = 0x02;
        assert_eq!(decode_service_data(&data), None);
    }

    #[test]
    fn test_decode_rejects_non_telemetry_frame_type() {
        let mut data = telemetry_a_service_data();
        data[0] = 0x13;
        assert_eq!(decode_service_data(&data), None);
    }

    #[test]
    fn test_decode_truncated_telemetry() {
        let mut data = telemetry_a_service_data();
        data.truncate(15);
        assert_eq!(decode_service_data(&data), None);
    }

    fn nearable_manufacturer_data() -> Vec<u8> {
        vec![
            0x01, // nearable frame
            0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11, // identifier
            0x04, // hardware version
            0x2e, // firmware version
            0x55, 0x01, // temperature 0x0155 = 341 -> 21.3125 C
            0x40, // is_moving
        ]
    }

    #[test]
    fn test_decode_nearable() {
        let BeaconFrame::EstimoteNearable(nearable) =
            decode_manufacturer_data(&nearable_manufacturer_data()).unwrap()
        else {
            panic!("expected nearable frame");
        };
        assert_eq!(nearable.identifier, "aabbccddeeff0011");
        assert_eq!(nearable.hardware_version, 0x04);
        assert_eq!(nearable.firmware_version, 0x2e);
        assert!((nearable.temperature - 21.3125).abs() < 1e-9);
        assert!(nearable.is_moving);
    }

    #[test]
    fn test_decode_nearable_negative_temperature() {
        let mut data = nearable_manufacturer_data();
        // 0x0fff = -1 as 12-bit two's complement
        data[11] = 0xff;
        data[12] = 0x0f;
        let BeaconFrame::EstimoteNearable(nearable) = decode_manufacturer_data(&data).unwrap()
        else {
            panic!("expected nearable frame");
        };
        assert!((nearable.temperature + 0.0625).abs() < 1e-9);
    }

    #[test]
    fn test_decode_nearable_wrong_frame_type() {
        let mut data = nearable_manufacturer_data();
        data[0] = 0x02;
        assert_eq!(decode_manufacturer_data(&data), None);
    }

    #[test]
    fn test_telemetry_properties() {
        let BeaconFrame::EstimoteTelemetryB(frame) =
            decode_service_data(&telemetry_b_service_data()).unwrap()
        else {
            panic!("expected telemetry B frame");
        };
        let props = frame.properties();
        assert_eq!(
            props.get("identifier"),
            Some(&PropertyValue::from("47a038d5eb032640"))
        );
        assert_eq!(props.get("protocol_version"), Some(&PropertyValue::Int(2)));
    }
}
