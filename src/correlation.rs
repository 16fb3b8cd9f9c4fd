//! Cross-packet identity correlation.
//!
//! Eddystone TLM, URL and EID frames do not carry the namespace/instance
//! identity; only the UID frame does. The cache remembers the identity last
//! seen for each device address so telemetry frames can be attributed to a
//! beacon.
//!
//! Entries never expire: addresses may rotate (privacy-preserving BLE), so
//! the cache grows by one entry per identity-bearing address for the
//! lifetime of a scan session. Replacement by address is the only removal
//! mechanism; callers that need a bound must recreate the pipeline.

use crate::bt_addr::BtAddr;
use crate::packet::{BeaconFrame, IdentityProperties};
use std::collections::HashMap;

/// Maps device addresses to their last observed identity properties.
#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: HashMap<BtAddr, IdentityProperties>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the identity carried by `frame`, replacing (not merging) any
    /// existing entry for the address. Frames without identity leave the
    /// cache untouched.
    pub fn update(&mut self, addr: BtAddr, frame: &BeaconFrame) {
        if frame.is_identity_bearing() {
            if let Some(properties) = frame.own_properties() {
                self.entries.insert(addr, properties);
            }
        }
    }

    /// The identity last observed for an address, if any.
    pub fn lookup(&self, addr: &BtAddr) -> Option<&IdentityProperties> {
        self.entries.get(addr)
    }

    /// Resolve the identity properties for a decoded frame.
    ///
    /// Frames carrying their own identity return it directly; identity
    /// omitting frames (TLM, URL, EID) fall back to the cached identity for
    /// the address, which is absent when no UID frame preceded them.
    pub fn resolve(&self, addr: &BtAddr, frame: &BeaconFrame) -> Option<IdentityProperties> {
        frame
            .own_properties()
            .or_else(|| self.lookup(addr).cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{
        EddystoneTlmFrame, EddystoneUidFrame, EddystoneUrlFrame, PropertyValue,
    };

    const ADDR_A: BtAddr = BtAddr([0x1c, 0xd6, 0xcd, 0xef, 0x94, 0x35]);
    const ADDR_B: BtAddr = BtAddr([0x00, 0x0b, 0x57, 0x5b, 0x56, 0x43]);

    fn uid_frame(instance: &str) -> BeaconFrame {
        BeaconFrame::EddystoneUid(EddystoneUidFrame {
            tx_power: -29,
            namespace: "12345678901234678901".to_string(),
            instance: instance.to_string(),
        })
    }

    fn tlm_frame() -> BeaconFrame {
        BeaconFrame::EddystoneTlm(EddystoneTlmFrame {
            voltage: 2840,
            temperature: 19,
            advertising_count: 5223,
            seconds_since_boot: 10948,
        })
    }

    #[test]
    fn test_tlm_resolves_to_cached_uid_identity() {
        let mut cache = IdentityCache::new();
        cache.update(ADDR_A, &uid_frame("000000000001"));
        cache.update(ADDR_A, &tlm_frame()); // no identity, no effect

        let properties = cache.resolve(&ADDR_A, &tlm_frame()).unwrap();
        assert_eq!(
            properties.get("instance"),
            Some(&PropertyValue::from("000000000001"))
        );
        assert_eq!(
            properties.get("namespace"),
            Some(&PropertyValue::from("12345678901234678901"))
        );
    }

    #[test]
    fn test_unseen_address_resolves_to_absent() {
        let cache = IdentityCache::new();
        assert_eq!(cache.resolve(&ADDR_B, &tlm_frame()), None);
    }

    #[test]
    fn test_url_frame_uses_correlation() {
        let mut cache = IdentityCache::new();
        cache.update(ADDR_A, &uid_frame("000000000001"));

        let url = BeaconFrame::EddystoneUrl(EddystoneUrlFrame {
            tx_power: -8,
            url: "https://github.com/citruz".to_string(),
        });
        let properties = cache.resolve(&ADDR_A, &url).unwrap();
        assert_eq!(
            properties.get("instance"),
            Some(&PropertyValue::from("000000000001"))
        );
    }

    #[test]
    fn test_uid_frame_resolves_to_own_identity() {
        let mut cache = IdentityCache::new();
        cache.update(ADDR_A, &uid_frame("000000000001"));

        // a fresh UID frame wins over whatever the cache holds
        let properties = cache
            .resolve(&ADDR_A, &uid_frame("000000000002"))
            .unwrap();
        assert_eq!(
            properties.get("instance"),
            Some(&PropertyValue::from("000000000002"))
        );
    }

    #[test]
    fn test_update_replaces_whole_entry() {
        let mut cache = IdentityCache::new();
        cache.update(ADDR_A, &uid_frame("000000000001"));
        cache.update(ADDR_A, &uid_frame("000000000002"));

        assert_eq!(cache.len(), 1);
        let properties = cache.lookup(&ADDR_A).unwrap();
        assert_eq!(
            properties.get("instance"),
            Some(&PropertyValue::from("000000000002"))
        );
    }

    #[test]
    fn test_addresses_are_independent() {
        let mut cache = IdentityCache::new();
        cache.update(ADDR_A, &uid_frame("000000000001"));
        cache.update(ADDR_B, &uid_frame("000000000002"));

        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.lookup(&ADDR_A).unwrap().get("instance"),
            Some(&PropertyValue::from("000000000001"))
        );
        assert_eq!(
            cache.lookup(&ADDR_B).unwrap().get("instance"),
            Some(&PropertyValue::from("000000000002"))
        );
    }
}
