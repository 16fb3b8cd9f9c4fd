//! Cheap multi-pattern prefilter for advertisement payloads.
//!
//! Built once per scan configuration from the frame families of interest,
//! then consulted for every received advertisement before the LTV parser
//! runs. The match is a full substring scan rather than an element-aligned
//! one; the occasional false positive is rejected by the real parser, which
//! is much cheaper than parsing every payload at high advertisement rates.

use crate::packet::{
    CJ_COMPANY_ID, EDDYSTONE_UUID, ESTIMOTE_COMPANY_ID, ESTIMOTE_UUID, EXPOSURE_NOTIFICATION_UUID,
    FrameKind, IBEACON_COMPANY_ID, IBEACON_PROXIMITY_TYPE, MANUFACTURER_DATA_TYPE,
    SERVICE_UUIDS_PREFIX,
};
use aho_corasick::AhoCorasick;

/// Multi-pattern matcher over the byte sequences that prefix each frame
/// family's identifying element.
#[derive(Debug)]
pub struct Prefilter {
    automaton: AhoCorasick,
}

impl Prefilter {
    /// Build a prefilter for the given frame families. An empty slice means
    /// all supported families.
    pub fn new(kinds: &[FrameKind]) -> Self {
        let kinds: &[FrameKind] = if kinds.is_empty() { &FrameKind::ALL } else { kinds };

        let mut patterns: Vec<Vec<u8>> = Vec::new();
        for kind in kinds {
            let pattern = Self::pattern_for(*kind);
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }

        let automaton = AhoCorasick::new(&patterns)
            .expect("prefilter patterns are small fixed byte strings");
        Prefilter { automaton }
    }

    fn pattern_for(kind: FrameKind) -> Vec<u8> {
        match kind {
            FrameKind::EddystoneUid
            | FrameKind::EddystoneUrl
            | FrameKind::EddystoneTlm
            | FrameKind::EddystoneEncryptedTlm
            | FrameKind::EddystoneEid => service_pattern(&EDDYSTONE_UUID),
            FrameKind::EstimoteTelemetryA | FrameKind::EstimoteTelemetryB => {
                service_pattern(&ESTIMOTE_UUID)
            }
            FrameKind::ExposureNotification => service_pattern(&EXPOSURE_NOTIFICATION_UUID),
            FrameKind::EstimoteNearable => manufacturer_pattern(&ESTIMOTE_COMPANY_ID, &[]),
            FrameKind::CjMonitor => manufacturer_pattern(&CJ_COMPANY_ID, &[]),
            FrameKind::IBeacon => {
                manufacturer_pattern(&IBEACON_COMPANY_ID, &IBEACON_PROXIMITY_TYPE)
            }
        }
    }

    /// Whether any registered pattern occurs anywhere in the payload.
    pub fn matches(&self, payload: &[u8]) -> bool {
        self.automaton.is_match(payload)
    }
}

fn service_pattern(uuid: &[u8; 2]) -> Vec<u8> {
    let mut pattern = SERVICE_UUIDS_PREFIX.to_vec();
    pattern.extend_from_slice(uuid);
    pattern
}

fn manufacturer_pattern(company_id: &[u8; 2], subtype: &[u8]) -> Vec<u8> {
    let mut pattern = vec![MANUFACTURER_DATA_TYPE];
    pattern.extend_from_slice(company_id);
    pattern.extend_from_slice(subtype);
    pattern
}
