//! Link-layer addressing, frame model, and the monitor-mode capture contract
//!
//! The raw capture/injection mechanism itself lives outside this crate; the
//! core only depends on the [`MonitorLink`] trait defined here. A conforming
//! implementation opens a monitor-mode handle on an interface, delivers
//! matching frames from a dedicated background thread, and injects raw
//! link-layer frames.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::{EspNowError, Result};

/// 802.11 management frame type
pub const FRAME_TYPE_MANAGEMENT: u8 = 0;

/// 802.11 control frame type
pub const FRAME_TYPE_CONTROL: u8 = 1;

/// Action frame subtype carrying ESP-NOW data (capture-filter notation)
pub const FRAME_SUBTYPE_ACTION: u8 = 0xd0;

/// Subtype of the link-layer delivery confirmation frame
pub const FRAME_SUBTYPE_CONFIRMATION: u8 = 0x1d;

/// Maximum time a capture implementation may take to acknowledge startup
pub const CAPTURE_START_TIMEOUT: Duration = Duration::from_secs(1);

/// The all-ones broadcast address
pub const BROADCAST_ADDR: MacAddr = MacAddr([0xff; 6]);

/// A 6-byte IEEE 802 hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Create an address from raw octets
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Get the raw octets
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Check whether this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == BROADCAST_ADDR
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = EspNowError;

    fn from_str(s: &str) -> Result<Self> {
        let mut octets = [0u8; 6];
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(EspNowError::Parse(format!("invalid MAC address: {s}")));
        }
        for (octet, part) in octets.iter_mut().zip(parts) {
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| EspNowError::Parse(format!("invalid MAC address: {s}")))?;
        }
        Ok(Self(octets))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Frame classification by 802.11 type/subtype pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Action frame carrying an ESP-NOW envelope (plaintext or encrypted)
    Data,
    /// Link-layer delivery confirmation, no protocol payload
    Confirmation,
    /// Anything else the capture filter let through
    Other(u8, u8),
}

impl FrameKind {
    /// Classify a type/subtype pair
    pub fn from_type_subtype(frame_type: u8, subtype: u8) -> Self {
        match (frame_type, subtype) {
            (FRAME_TYPE_MANAGEMENT, FRAME_SUBTYPE_ACTION) => Self::Data,
            (FRAME_TYPE_CONTROL, FRAME_SUBTYPE_CONFIRMATION) => Self::Confirmation,
            (t, s) => Self::Other(t, s),
        }
    }
}

/// A frame handed to the core by the capture layer
///
/// The capture layer parses the 802.11 header (and the CCMP header when
/// present) and delivers the fields the pipeline needs. `payload` is the
/// frame body after the header: the ESP-NOW envelope for plaintext data
/// frames, ciphertext plus the 8-byte tag for encrypted ones, empty for
/// confirmations.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Frame classification
    pub kind: FrameKind,
    /// Transmitter address
    pub src: MacAddr,
    /// Receiver address
    pub dst: MacAddr,
    /// Frame body
    pub payload: Bytes,
    /// CCMP packet number (PN0..PN5, least significant first) when the frame
    /// carries a cryptographic header; `None` for plaintext frames
    pub packet_number: Option<[u8; 6]>,
}

impl CapturedFrame {
    /// Whether the frame carries a cryptographic element
    pub fn is_encrypted(&self) -> bool {
        self.packet_number.is_some()
    }
}

/// Callback invoked by the capture layer once per matching frame
pub type FrameHandler = Arc<dyn Fn(CapturedFrame) + Send + Sync>;

/// Contract the core consumes from the monitor-mode capture/injection layer
///
/// Implementations wrap an already-opened monitor-mode handle. `start_capture`
/// must invoke the handler from a single dedicated background thread, one
/// frame at a time, and report readiness within [`CAPTURE_START_TIMEOUT`]:
/// `Ok(true)` once capture is live, `Ok(false)` if startup timed out.
pub trait MonitorLink: Send + Sync {
    /// Hardware address of the underlying interface
    fn hardware_address(&self) -> Result<MacAddr>;

    /// Begin delivering frames matching `filter` to `on_frame`
    fn start_capture(&self, filter: &str, on_frame: FrameHandler) -> Result<bool>;

    /// Inject a raw link-layer frame
    fn inject(&self, frame: &[u8]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_addr_display_roundtrip() {
        let mac = MacAddr([0xe0, 0x5a, 0x1b, 0x11, 0x22, 0x33]);
        assert_eq!(mac.to_string(), "E0:5A:1B:11:22:33");
        assert_eq!("E0:5A:1B:11:22:33".parse::<MacAddr>().unwrap(), mac);
        assert_eq!("e0:5a:1b:11:22:33".parse::<MacAddr>().unwrap(), mac);
    }

    #[test]
    fn test_mac_addr_parse_errors() {
        assert!("E0:5A:1B:11:22".parse::<MacAddr>().is_err());
        assert!("E0:5A:1B:11:22:ZZ".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_broadcast() {
        assert!(BROADCAST_ADDR.is_broadcast());
        assert!(!MacAddr([0; 6]).is_broadcast());
        assert_eq!(BROADCAST_ADDR.to_string(), "FF:FF:FF:FF:FF:FF");
    }

    #[test]
    fn test_frame_kind_classification() {
        assert_eq!(
            FrameKind::from_type_subtype(FRAME_TYPE_MANAGEMENT, FRAME_SUBTYPE_ACTION),
            FrameKind::Data
        );
        assert_eq!(
            FrameKind::from_type_subtype(FRAME_TYPE_CONTROL, FRAME_SUBTYPE_CONFIRMATION),
            FrameKind::Confirmation
        );
        assert_eq!(FrameKind::from_type_subtype(2, 0), FrameKind::Other(2, 0));
    }

    #[test]
    fn test_mac_addr_serde() {
        let mac = MacAddr([0x48, 0x55, 0x19, 0x00, 0x00, 0x55]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"48:55:19:00:00:55\"");
        let back: MacAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }
}
