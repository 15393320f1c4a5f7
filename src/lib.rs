//! # ESP-NOW Host Peer
//!
//! This is a host-side Rust implementation of the ESP-NOW connectionless
//! wireless messaging protocol normally spoken by small embedded radios.
//! Messages ride inside vendor-specific 802.11 action frames sent and
//! received in monitor mode; no association, authentication handshake, or IP
//! stack is involved.
//!
//! ## Architecture
//!
//! The implementation is organized into several modules:
//! - `link`: MAC addressing, frame model, and the monitor-mode capture contract
//! - `wire`: Wire envelope encoding/decoding and 802.11 header construction
//! - `dedupe`: Bounded recency rings for replay/duplicate suppression
//! - `filter`: Capture filter expression construction
//! - `crypto`: Session key derivation and CCM authenticated decryption
//! - `signature`: Declarative device signature matching and field extraction
//! - `delivery`: Delivery-confirmation wait/signal tracking
//! - `peer`: The peer orchestrating the receive pipeline and send operation
//! - `config`: File-backed peer configuration
//! - `profiles`: Reference device signature profiles

pub mod config;
pub mod crypto;
pub mod dedupe;
pub mod delivery;
pub mod filter;
pub mod link;
pub mod peer;
pub mod profiles;
pub mod signature;
pub mod wire;

// Re-export commonly used types
pub use crate::{
    config::PeerConfig,
    crypto::CryptoEngine,
    dedupe::RecentValueRing,
    delivery::DeliveryTracker,
    filter::CaptureFilterBuilder,
    link::{CapturedFrame, FrameKind, MacAddr, MonitorLink, BROADCAST_ADDR},
    peer::{EspNowPeer, PeerStats, RxEvent},
    signature::{FieldEffect, FieldValue, OutputMode, SignatureSpec},
};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EspNowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Sending encrypted messages is not supported")]
    EncryptedSendUnsupported,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for ESP-NOW operations
pub type Result<T> = std::result::Result<T, EspNowError>;
