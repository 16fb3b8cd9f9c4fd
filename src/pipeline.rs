//! The synchronous decode-classify-dispatch pipeline.
//!
//! One advertisement is fully prefiltered, framed, decoded, correlated and
//! filtered before the next is considered; nothing here suspends, blocks or
//! spawns. The identity cache is the only mutable state and is touched
//! exclusively from this path, so the pipeline needs no locking as long as a
//! single ingestion task drives it.

use crate::bt_addr::BtAddr;
use crate::correlation::IdentityCache;
use crate::filters::DeviceFilter;
use crate::packet::{BeaconFrame, FrameKind, IdentityProperties};
use crate::parser::parse_advertisement;
use crate::prefilter::Prefilter;

/// A decoded and accepted beacon advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconEvent {
    /// Address of the sending device
    pub addr: BtAddr,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// The decoded frame
    pub frame: BeaconFrame,
    /// Resolved identity, absent for identity-omitting frames from devices
    /// whose UID frame has not been seen
    pub properties: Option<IdentityProperties>,
}

/// Decodes raw advertisement payloads and applies the configured filters.
///
/// Configuration is fixed at construction: the prefilter is built once from
/// the packet filter kinds (or all kinds when none are given) and the filter
/// lists are immutable afterwards.
#[derive(Debug)]
pub struct BeaconPipeline {
    prefilter: Prefilter,
    cache: IdentityCache,
    device_filters: Vec<DeviceFilter>,
    packet_filters: Option<Vec<FrameKind>>,
}

impl BeaconPipeline {
    pub fn new(device_filters: Vec<DeviceFilter>, packet_filters: Vec<FrameKind>) -> Self {
        let prefilter = Prefilter::new(&packet_filters);
        let packet_filters = if packet_filters.is_empty() {
            None
        } else {
            Some(packet_filters)
        };
        BeaconPipeline {
            prefilter,
            cache: IdentityCache::new(),
            device_filters,
            packet_filters,
        }
    }

    /// Process one received advertisement.
    ///
    /// Returns the decoded event when the payload holds a recognizable frame
    /// that passes the configured filters, `None` otherwise. Never fails on
    /// malformed input.
    pub fn process(&mut self, payload: &[u8], addr: BtAddr, rssi: i16) -> Option<BeaconEvent> {
        // reject payloads that cannot match any family of interest before
        // paying the full parse cost
        if !self.prefilter.matches(payload) {
            return None;
        }

        let frame = parse_advertisement(payload)?;

        // remember which beacon identity belongs to this address; TLM and URL
        // frames do not repeat it
        self.cache.update(addr, &frame);
        let properties = self.cache.resolve(&addr, &frame);

        if let Some(kinds) = &self.packet_filters {
            if !kinds.contains(&frame.kind()) {
                return None;
            }
        }

        if !self.device_filters.is_empty() {
            // OR across filters, first match wins; AND within one filter
            let matched = self
                .device_filters
                .iter()
                .any(|filter| filter.matches(addr, properties.as_ref()));
            if !matched {
                return None;
            }
        }

        Some(BeaconEvent {
            addr,
            rssi,
            frame,
            properties,
        })
    }

    /// Number of addresses held by the identity correlation cache.
    pub fn cached_identities(&self) -> usize {
        self.cache.len()
    }
}
