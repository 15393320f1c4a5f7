//! Reference device signature profiles
//!
//! These are illustrative configuration data, not part of the protocol core:
//! the same specifications could equally be loaded from a JSON or TOML file.

use std::collections::BTreeMap;

use crate::signature::{FieldEffect, OutputMode, SignatureSpec};

/// WiZmote 6-button remote
///
/// 13-byte reports: message kind, 32-bit press sequence, a data-type byte
/// (0x20), the button code, a second data-type byte (0x01), battery level,
/// and 4 trailing CCM bytes that double as a per-press identity. Remotes
/// resend each press aggressively, so the profile keeps a private dedup
/// ring over source address plus those trailing bytes.
pub fn wizmote_remote() -> SignatureSpec {
    let buttons = [
        (1, "ON"),
        (2, "OFF"),
        (3, "SLEEP"),
        (16, "1"),
        (17, "2"),
        (18, "3"),
        (19, "4"),
        (8, "-"),
        (9, "+"),
    ];
    SignatureSpec {
        name: "wizmote".to_string(),
        length: Some(13),
        bytes: BTreeMap::from([(5, 0x20), (7, 0x01)]),
        layout: "<BIBBBB4s".to_string(),
        fields: ["kind", "sequence", "d1", "button", "d2", "battery", "ccm"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        effects: BTreeMap::from([
            (
                "button".to_string(),
                FieldEffect::Lookup(
                    buttons
                        .iter()
                        .map(|(code, label)| (*code, label.to_string()))
                        .collect(),
                ),
            ),
            ("battery".to_string(), FieldEffect::PassThrough(true)),
        ]),
        output: OutputMode::Mapping,
        dedupe: true,
    }
}

/// PIR motion sensor
///
/// 8-byte reports: message kind 0x51, 32-bit report sequence, event code,
/// battery level, one reserved pad byte.
pub fn motion_sensor() -> SignatureSpec {
    SignatureSpec {
        name: "motion_sensor".to_string(),
        length: Some(8),
        bytes: BTreeMap::from([(0, 0x51)]),
        layout: "<BIBBx".to_string(),
        fields: ["kind", "sequence", "event", "battery"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        effects: BTreeMap::from([
            (
                "event".to_string(),
                FieldEffect::Lookup(BTreeMap::from([
                    (1, "MOTION".to_string()),
                    (2, "CLEAR".to_string()),
                    (3, "TAMPER".to_string()),
                ])),
            ),
            ("battery".to_string(), FieldEffect::PassThrough(true)),
        ]),
        output: OutputMode::Mapping,
        dedupe: false,
    }
}
