//! Advertisement payload parsing: LTV framing and vendor dispatch.
//!
//! The framer splits a raw advertising payload into length-type-value
//! elements without ever reading past the end of the buffer. The dispatcher
//! then routes Service Data and Manufacturer Specific Data elements to the
//! vendor decoders by their 2-byte service UUID or company identifier,
//! compared byte-for-byte.
//!
//! The top-level entry point [`parse_advertisement`] never panics and never
//! returns an error: advertisement bytes are untrusted radio data, so every
//! structural problem collapses to "no frame".

use crate::packet::{
    self, BeaconFrame, CJ_COMPANY_ID, COMPLETE_LOCAL_NAME_TYPE, EDDYSTONE_UUID, ESTIMOTE_COMPANY_ID,
    ESTIMOTE_UUID, EXPOSURE_NOTIFICATION_UUID, IBEACON_COMPANY_ID, MANUFACTURER_DATA_TYPE,
    SERVICE_DATA_TYPE,
};
use thiserror::Error;

/// A single length-type-value element of an advertising payload.
///
/// `value` holds `length - 1` bytes; the type byte is counted by `length`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawElement<'a> {
    pub length: u8,
    pub type_tag: u8,
    pub value: &'a [u8],
}

/// Structural framing errors. These never escape the top-level decode entry
/// point; they exist so the framer's contract can be tested directly.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// A declared element length would run past the end of the buffer
    #[error("truncated payload: element at offset {offset} overruns the buffer")]
    Truncated { offset: usize },
    /// An element declared length zero, which cannot hold its own type byte
    #[error("invalid payload: zero-length element at offset {offset}")]
    ZeroLength { offset: usize },
}

/// Split a payload into its LTV elements.
///
/// Unknown type tags are not errors; their elements are kept as opaque byte
/// slices and simply ignored by dispatch. An empty payload yields an empty
/// sequence.
pub fn frame_elements(payload: &[u8]) -> Result<Vec<RawElement<'_>>, DecodeError> {
    let mut elements = Vec::new();
    let mut offset = 0;

    while offset < payload.len() {
        let length = payload[offset] as usize;
        if length == 0 {
            return Err(DecodeError::ZeroLength { offset });
        }
        let end = offset + 1 + length;
        if end > payload.len() {
            return Err(DecodeError::Truncated { offset });
        }
        elements.push(RawElement {
            length: length as u8,
            type_tag: payload[offset + 1],
            value: &payload[offset + 2..end],
        });
        offset = end;
    }

    Ok(elements)
}

/// Decode the first recognizable beacon frame from an advertising payload.
///
/// At most one frame is produced per advertisement; dispatch stops at the
/// first element that decodes. Malformed payloads and payloads without any
/// known frame both yield `None`.
pub fn parse_advertisement(payload: &[u8]) -> Option<BeaconFrame> {
    let elements = frame_elements(payload).ok()?;
    elements
        .iter()
        .find_map(|element| dispatch_element(element, &elements))
}

fn dispatch_element(element: &RawElement<'_>, all: &[RawElement<'_>]) -> Option<BeaconFrame> {
    match element.type_tag {
        SERVICE_DATA_TYPE => {
            let uuid = element.value.get(..2)?;
            let data = &element.value[2..];
            if uuid == EDDYSTONE_UUID {
                packet::eddystone::decode_service_data(data)
            } else if uuid == ESTIMOTE_UUID {
                packet::estimote::decode_service_data(data)
            } else if uuid == EXPOSURE_NOTIFICATION_UUID {
                packet::exposure::decode_service_data(data)
            } else {
                None
            }
        }
        MANUFACTURER_DATA_TYPE => {
            let company = element.value.get(..2)?;
            let data = &element.value[2..];
            if company == ESTIMOTE_COMPANY_ID {
                packet::estimote::decode_manufacturer_data(data)
            } else if company == CJ_COMPANY_ID {
                packet::cjmonitor::decode(data, find_local_name(all))
            } else if company == IBEACON_COMPANY_ID {
                packet::ibeacon::decode_manufacturer_data(data)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// The Complete Local Name element of the payload, if present.
fn find_local_name<'a>(elements: &[RawElement<'a>]) -> Option<&'a [u8]> {
    elements
        .iter()
        .find(|element| element.type_tag == COMPLETE_LOCAL_NAME_TYPE)
        .map(|element| element.value)
}
