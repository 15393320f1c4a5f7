//! Capture filter expression construction
//!
//! The capture layer takes an opaque filter string; this module derives that
//! string from the peer's addressing and encryption configuration. With
//! plaintext traffic the protocol marker sits at a fixed offset in the frame
//! body (`wlan[24:4]`), so the filter can match it directly. Ciphertext hides
//! the marker, so the encrypted regime matches every action frame and leaves
//! the narrowing to the receive pipeline.

use crate::link::{MacAddr, BROADCAST_ADDR};
use crate::wire::PROTOCOL_MARKER;

/// Builder for the capture-layer filter expression
#[derive(Debug, Clone)]
pub struct CaptureFilterBuilder {
    local: MacAddr,
    accept_all: bool,
    encrypted: bool,
}

impl CaptureFilterBuilder {
    /// Create a builder for the given local address
    pub fn new(local: MacAddr) -> Self {
        Self {
            local,
            accept_all: false,
            encrypted: false,
        }
    }

    /// Accept frames regardless of destination address
    pub fn accept_all(mut self, accept_all: bool) -> Self {
        self.accept_all = accept_all;
        self
    }

    /// Expect encrypted traffic (marker matching impossible on ciphertext)
    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Build the filter expression
    pub fn build(&self) -> String {
        let marker = u32::from_be_bytes(PROTOCOL_MARKER);

        let data_clause = if self.encrypted {
            "type 0 subtype 0xd0".to_string()
        } else {
            format!("(type 0 subtype 0xd0 and wlan[24:4]={marker:#010x})")
        };
        let confirm_clause = format!("(type 1 subtype 0x1d and wlan addr1 {})", self.local);

        // Never hand our own transmissions back to the pipeline
        let mut filter = format!(
            "({data_clause} or {confirm_clause}) and not wlan src {}",
            self.local
        );

        if !self.accept_all {
            filter.push_str(&format!(
                " and (wlan addr1 {} or wlan addr1 {})",
                self.local, BROADCAST_ADDR
            ));
        }

        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> MacAddr {
        "48:55:19:00:00:55".parse().unwrap()
    }

    #[test]
    fn test_plaintext_filter() {
        let filter = CaptureFilterBuilder::new(local()).build();
        assert_eq!(
            filter,
            "((type 0 subtype 0xd0 and wlan[24:4]=0x7f18fe34) or \
             (type 1 subtype 0x1d and wlan addr1 48:55:19:00:00:55)) \
             and not wlan src 48:55:19:00:00:55 \
             and (wlan addr1 48:55:19:00:00:55 or wlan addr1 FF:FF:FF:FF:FF:FF)"
        );
    }

    #[test]
    fn test_accept_all_drops_destination_clause() {
        let filter = CaptureFilterBuilder::new(local()).accept_all(true).build();
        assert!(filter.contains("wlan[24:4]=0x7f18fe34"));
        assert!(filter.contains("not wlan src 48:55:19:00:00:55"));
        assert!(!filter.contains("or wlan addr1 FF:FF:FF:FF:FF:FF"));
    }

    #[test]
    fn test_encrypted_filter_matches_all_action_frames() {
        let filter = CaptureFilterBuilder::new(local()).encrypted(true).build();
        assert!(!filter.contains("wlan[24:4]"));
        assert!(filter.starts_with("(type 0 subtype 0xd0 or "));
        assert!(filter.contains("type 1 subtype 0x1d and wlan addr1 48:55:19:00:00:55"));
        assert!(filter.contains("and (wlan addr1 48:55:19:00:00:55 or wlan addr1 FF:FF:FF:FF:FF:FF)"));
    }
}
