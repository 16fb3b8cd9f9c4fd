//! Device filters for decoded beacon frames.
//!
//! A device filter either matches on the Bluetooth address alone or on a
//! non-empty set of identity properties. Filters are validated eagerly at
//! construction; evaluation never fails. Packet-type filtering uses
//! [`FrameKind`](crate::packet::FrameKind) values directly, whose parsing
//! already rejects unknown names.

use crate::bt_addr::{BtAddr, ParseBtAddrError};
use crate::packet::{IdentityProperties, PropertyValue};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised when constructing a device filter.
#[derive(Error, Debug, PartialEq)]
pub enum FilterError {
    /// A property filter needs at least one key to discriminate on
    #[error("device filter must contain at least one property")]
    Empty,
    /// The bluetooth address text was not six lowercase hex pairs
    #[error(transparent)]
    Address(#[from] ParseBtAddrError),
}

/// A non-empty set of expected identity properties.
///
/// Matches a candidate iff every filter key is present in the candidate with
/// an equal value.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFilter {
    entries: Vec<(String, PropertyValue)>,
}

impl PropertyFilter {
    pub fn new(entries: Vec<(String, PropertyValue)>) -> Result<Self, FilterError> {
        if entries.is_empty() {
            return Err(FilterError::Empty);
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[(String, PropertyValue)] {
        &self.entries
    }

    pub fn matches(&self, candidate: &IdentityProperties) -> bool {
        self.entries
            .iter()
            .all(|(key, value)| candidate.get(key) == Some(value))
    }
}

/// A predicate over a decoded frame's device address and identity.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceFilter {
    /// Match on the device address only
    Address(BtAddr),
    /// Match on identity properties
    Properties(PropertyFilter),
}

impl DeviceFilter {
    /// Filter by bluetooth address, given as `aa:bb:cc:dd:ee:ff`.
    pub fn bt_addr(addr: &str) -> Result<Self, FilterError> {
        Ok(DeviceFilter::Address(BtAddr::from_str(addr)?))
    }

    /// Filter for Eddystone beacons by namespace and/or instance.
    pub fn eddystone(namespace: Option<&str>, instance: Option<&str>) -> Result<Self, FilterError> {
        let mut entries = Vec::new();
        if let Some(namespace) = namespace {
            entries.push(("namespace".to_string(), PropertyValue::from(namespace)));
        }
        if let Some(instance) = instance {
            entries.push(("instance".to_string(), PropertyValue::from(instance)));
        }
        Ok(DeviceFilter::Properties(PropertyFilter::new(entries)?))
    }

    /// Filter for iBeacons by proximity UUID and/or major/minor.
    pub fn ibeacon(
        uuid: Option<&str>,
        major: Option<u16>,
        minor: Option<u16>,
    ) -> Result<Self, FilterError> {
        let mut entries = Vec::new();
        if let Some(uuid) = uuid {
            entries.push(("uuid".to_string(), PropertyValue::from(uuid)));
        }
        if let Some(major) = major {
            entries.push(("major".to_string(), PropertyValue::from(i64::from(major))));
        }
        if let Some(minor) = minor {
            entries.push(("minor".to_string(), PropertyValue::from(i64::from(minor))));
        }
        Ok(DeviceFilter::Properties(PropertyFilter::new(entries)?))
    }

    /// Filter for Estimote telemetry by identifier and/or protocol version.
    pub fn estimote(
        identifier: Option<&str>,
        protocol_version: Option<u8>,
    ) -> Result<Self, FilterError> {
        let mut entries = Vec::new();
        if let Some(identifier) = identifier {
            entries.push(("identifier".to_string(), PropertyValue::from(identifier)));
        }
        if let Some(version) = protocol_version {
            entries.push((
                "protocol_version".to_string(),
                PropertyValue::from(i64::from(version)),
            ));
        }
        Ok(DeviceFilter::Properties(PropertyFilter::new(entries)?))
    }

    /// Evaluate against a device address and its resolved identity.
    ///
    /// Address filters never consult the identity; property filters never
    /// match when the identity is absent.
    pub fn matches(&self, addr: BtAddr, properties: Option<&IdentityProperties>) -> bool {
        match self {
            DeviceFilter::Address(expected) => *expected == addr,
            DeviceFilter::Properties(filter) => {
                properties.is_some_and(|candidate| filter.matches(candidate))
            }
        }
    }
}

/// Parse a device filter from a command line argument.
///
/// Format: comma-separated `key=value` pairs, e.g.
/// `namespace=12345678901234678901,instance=000000000001`. The single key
/// `bt_addr` selects an address filter. Values that parse as integers or
/// booleans are compared numerically, everything else as text.
pub fn parse_device_filter(src: &str) -> Result<DeviceFilter, String> {
    let mut entries = Vec::new();
    let mut address = None;

    for pair in src.split(',') {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("invalid filter entry '{pair}': expected KEY=VALUE"))?;
        let key = key.trim();
        let value = value.trim();
        if key == "bt_addr" {
            address = Some(value);
        } else {
            entries.push((key.to_string(), parse_property_value(value)));
        }
    }

    match address {
        Some(addr) => {
            if !entries.is_empty() {
                return Err("bt_addr cannot be combined with property keys".to_string());
            }
            DeviceFilter::bt_addr(addr).map_err(|e| e.to_string())
        }
        None => PropertyFilter::new(entries)
            .map(DeviceFilter::Properties)
            .map_err(|e| e.to_string()),
    }
}

fn parse_property_value(value: &str) -> PropertyValue {
    if let Ok(int) = value.parse::<i64>() {
        return PropertyValue::Int(int);
    }
    match value {
        "true" => PropertyValue::Bool(true),
        "false" => PropertyValue::Bool(false),
        _ => PropertyValue::from(value),
    }
}
