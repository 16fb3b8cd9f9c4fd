//! Eddystone frame decoders (UID, URL, TLM, EID).
//!
//! Layouts follow the Google Eddystone protocol specification. All decoders
//! take the service data bytes after the 16-bit Eddystone UUID and return
//! `None` on any structural mismatch.

use super::{BeaconFrame, IdentityProperties, PropertyValue};
use std::fmt;

// Frame type discriminants (first service data byte after the UUID)
const UID_FRAME: u8 = 0x00;
const URL_FRAME: u8 = 0x10;
const TLM_FRAME: u8 = 0x20;
const EID_FRAME: u8 = 0x30;

const TLM_UNENCRYPTED: u8 = 0x00;
const TLM_ENCRYPTED: u8 = 0x01;

/// URL scheme prefixes indexed by the scheme byte.
const URL_SCHEMES: [&str; 4] = ["http://www.", "https://www.", "http://", "https://"];

/// TLD suffixes substituted for the byte values 0x00-0x0d in URL frames.
const TLD_ENCODINGS: [&str; 14] = [
    ".com/", ".org/", ".edu/", ".net/", ".info/", ".biz/", ".gov/", ".com", ".org", ".edu",
    ".net", ".info", ".biz", ".gov",
];

/// Eddystone UID frame: stable namespace + instance identity.
#[derive(Debug, Clone, PartialEq)]
pub struct EddystoneUidFrame {
    /// Calibrated Tx power at 0 m, in dBm
    pub tx_power: i8,
    /// 10-byte namespace identifier as lowercase hex
    pub namespace: String,
    /// 6-byte instance identifier as lowercase hex
    pub instance: String,
}

impl EddystoneUidFrame {
    pub fn properties(&self) -> IdentityProperties {
        IdentityProperties::new(vec![
            ("namespace", PropertyValue::from(self.namespace.clone())),
            ("instance", PropertyValue::from(self.instance.clone())),
        ])
    }
}

impl fmt::Display for EddystoneUidFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EddystoneUidFrame<tx_power: {}, namespace: {}, instance: {}>",
            self.tx_power, self.namespace, self.instance
        )
    }
}

/// Eddystone URL frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EddystoneUrlFrame {
    /// Calibrated Tx power at 0 m, in dBm
    pub tx_power: i8,
    /// Transmitted URL with scheme prefix and TLD codes expanded
    pub url: String,
}

impl fmt::Display for EddystoneUrlFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EddystoneUrlFrame<tx_power: {}, url: {}>",
            self.tx_power, self.url
        )
    }
}

/// Unencrypted Eddystone TLM (telemetry) frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EddystoneTlmFrame {
    /// Battery voltage in mV
    pub voltage: u16,
    /// Raw beacon temperature reading
    pub temperature: u16,
    /// Advertising PDU count since power-on
    pub advertising_count: u32,
    /// Time since power-on or reboot, in seconds
    pub seconds_since_boot: u32,
}

impl EddystoneTlmFrame {
    /// Temperature interpreted as 8.8 signed fixed point, in degrees Celsius.
    ///
    /// Some firmware versions report the raw value, others the fixed-point
    /// encoding; both interpretations are exposed.
    pub fn temperature_fixed_point(&self) -> f64 {
        f64::from(self.temperature as i16) / 256.0
    }
}

impl fmt::Display for EddystoneTlmFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EddystoneTlmFrame<voltage: {} mV, temperature: {}, advertising count: {}, seconds since boot: {}>",
            self.voltage, self.temperature, self.advertising_count, self.seconds_since_boot
        )
    }
}

/// Encrypted Eddystone TLM frame, passed through undecrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct EddystoneEncryptedTlmFrame {
    /// Encrypted TLM data, opaque
    pub encrypted_data: [u8; 12],
    /// 16-bit salt
    pub salt: u16,
    /// 16-bit message integrity check
    pub mic: u16,
}

impl fmt::Display for EddystoneEncryptedTlmFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EddystoneEncryptedTlmFrame<encrypted_data: {}, salt: {}, mic: {}>",
            hex::encode(self.encrypted_data),
            self.salt,
            self.mic
        )
    }
}

/// Eddystone EID frame: ephemeral identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct EddystoneEidFrame {
    /// Calibrated Tx power at 0 m, in dBm
    pub tx_power: i8,
    /// 8-byte ephemeral identifier
    pub eid: [u8; 8],
}

impl fmt::Display for EddystoneEidFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EddystoneEidFrame<tx_power: {}, eid: {}>",
            self.tx_power,
            hex::encode(self.eid)
        )
    }
}

/// Decode Eddystone service data (the bytes after the `aa fe` UUID).
pub(crate) fn decode_service_data(data: &[u8]) -> Option<BeaconFrame> {
    let (&frame_type, frame) = data.split_first()?;
    match frame_type {
        UID_FRAME => decode_uid(frame),
        URL_FRAME => decode_url(frame),
        TLM_FRAME => decode_tlm(frame),
        EID_FRAME => decode_eid(frame),
        _ => None,
    }
}

fn decode_uid(frame: &[u8]) -> Option<BeaconFrame> {
    // tx power + 10-byte namespace + 6-byte instance; trailing RFU bytes ignored
    if frame.len() < 17 {
        return None;
    }
    Some(BeaconFrame::EddystoneUid(EddystoneUidFrame {
        tx_power: frame[0] as i8,
        namespace: hex::encode(&frame[1..11]),
        instance: hex::encode(&frame[11..17]),
    }))
}

fn decode_url(frame: &[u8]) -> Option<BeaconFrame> {
    if frame.len() < 2 {
        return None;
    }
    let tx_power = frame[0] as i8;
    let scheme = *URL_SCHEMES.get(frame[1] as usize)?;

    let mut url = String::with_capacity(scheme.len() + frame.len() * 4);
    url.push_str(scheme);
    for &byte in &frame[2..] {
        match byte {
            // TLD codes expand wherever they occur, not just once
            0x00..=0x0d => url.push_str(TLD_ENCODINGS[byte as usize]),
            0x0e..=0x7f => url.push(byte as char),
            _ => return None,
        }
    }

    Some(BeaconFrame::EddystoneUrl(EddystoneUrlFrame { tx_power, url }))
}

fn decode_tlm(frame: &[u8]) -> Option<BeaconFrame> {
    let (&version, body) = frame.split_first()?;
    match version {
        TLM_UNENCRYPTED => {
            if body.len() < 12 {
                return None;
            }
            Some(BeaconFrame::EddystoneTlm(EddystoneTlmFrame {
                voltage: u16::from_be_bytes([body[0], body[1]]),
                temperature: u16::from_le_bytes([body[2], body[3]]),
                advertising_count: u32::from_be_bytes([body[4], body[5], body[6], body[7]]),
                seconds_since_boot: u32::from_be_bytes([body[8], body[9], body[10], body[11]]),
            }))
        }
        TLM_ENCRYPTED => {
            if body.len() < 16 {
                return None;
            }
            let mut encrypted_data = [0u8; 12];
            encrypted_data.copy_from_slice(&body[..12]);
            Some(BeaconFrame::EddystoneEncryptedTlm(
                EddystoneEncryptedTlmFrame {
                    encrypted_data,
                    salt: u16::from_le_bytes([body[12], body[13]]),
                    mic: u16::from_le_bytes([body[14], body[15]]),
                },
            ))
        }
        _ => None,
    }
}

fn decode_eid(frame: &[u8]) -> Option<BeaconFrame> {
    if frame.len() < 9 {
        return None;
    }
    let mut eid = [0u8; 8];
    eid.copy_from_slice(&frame[1..9]);
    Some(BeaconFrame::EddystoneEid(EddystoneEidFrame {
        tx_power: frame[0] as i8,
        eid,
    }))
}
