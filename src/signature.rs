//! Declarative device signature matching and field extraction
//!
//! Known device types (remotes, sensors) speak fixed-shape messages. A
//! signature describes such a shape declaratively: an optional exact length,
//! required byte values at fixed offsets, an ordered fixed-width field
//! layout, and a per-field effect (pass the value through, or replace it via
//! a value-to-label lookup table). The table of signatures is data, not a
//! class hierarchy; matching scans it in registration order and the first
//! match wins.
//!
//! Layout strings use a little-endian `struct`-style notation: an optional
//! leading `<`, then field codes `B` (u8), `H` (u16), `I` (u32), `Q` (u64),
//! `?` (bool), `Ns` (N raw bytes), `Nx` (N pad bytes, skipped). A repeat
//! count before an integer code expands to that many fields.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use crate::dedupe::RecentValueRing;
use crate::link::MacAddr;
use crate::{EspNowError, Result};

/// A value decoded from one signature field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Unsigned integer field (`B`, `H`, `I`, `Q`)
    Uint(u64),
    /// Boolean field (`?`)
    Bool(bool),
    /// Raw byte field (`Ns`)
    Bytes(Vec<u8>),
    /// Label substituted through a lookup table
    Text(String),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FieldValue::Uint(v) => serializer.serialize_u64(*v),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Bytes(b) => serializer.serialize_str(&hex::encode(b)),
            FieldValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl FieldValue {
    /// Integer value of the field, if it has one
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Uint(v) => Some(*v),
            FieldValue::Bool(b) => Some(u64::from(*b)),
            _ => None,
        }
    }
}

/// What to do with a decoded field when assembling the output mapping
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FieldEffect {
    /// `true` copies the decoded value into the output; `false` drops it
    PassThrough(bool),
    /// Replace the decoded integer with the table's label; values with no
    /// entry are silently omitted
    Lookup(BTreeMap<u64, String>),
}

impl<'de> Deserialize<'de> for FieldEffect {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // JSON and TOML map keys are always strings, so deserialize the
        // lookup table with string keys and parse them into integers.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            PassThrough(bool),
            Lookup(BTreeMap<String, String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::PassThrough(flag) => Ok(FieldEffect::PassThrough(flag)),
            Raw::Lookup(table) => {
                let mut parsed = BTreeMap::new();
                for (key, label) in table {
                    let key = key.parse::<u64>().map_err(serde::de::Error::custom)?;
                    parsed.insert(key, label);
                }
                Ok(FieldEffect::Lookup(parsed))
            }
        }
    }
}

/// How a matched message is handed to the signature's callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Raw message bytes
    Raw,
    /// Hex-encoded message bytes
    Hex,
    /// Structured field mapping
    #[default]
    Mapping,
    /// Field mapping serialized to JSON text
    Json,
}

/// The payload delivered to a signature callback, per its output mode
#[derive(Debug, Clone, PartialEq)]
pub enum SignatureOutput {
    Raw(Vec<u8>),
    Hex(String),
    Mapping(BTreeMap<String, FieldValue>),
    Json(String),
}

/// Callback attached to a signature
pub type SignatureCallback = Arc<dyn Fn(MacAddr, SignatureOutput) + Send + Sync>;

/// Declarative signature specification (configuration data)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureSpec {
    /// Signature name, for logs and diagnostics
    pub name: String,
    /// Exact message length constraint
    #[serde(default)]
    pub length: Option<usize>,
    /// Required byte values at fixed offsets
    #[serde(default)]
    pub bytes: BTreeMap<usize, u8>,
    /// Field layout string
    pub layout: String,
    /// Ordered field names, one per layout field
    pub fields: Vec<String>,
    /// Field name to effect mapping; fields absent here are omitted
    #[serde(default)]
    pub effects: BTreeMap<String, FieldEffect>,
    /// Output encoding handed to the callback
    #[serde(default)]
    pub output: OutputMode,
    /// Keep a private dedup ring keyed on source address plus the last
    /// field's raw bytes
    #[serde(default)]
    pub dedupe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    U8,
    U16,
    U32,
    U64,
    Bool,
    Bytes(usize),
    Pad(usize),
}

impl FieldType {
    fn size(&self) -> usize {
        match self {
            FieldType::U8 | FieldType::Bool => 1,
            FieldType::U16 => 2,
            FieldType::U32 => 4,
            FieldType::U64 => 8,
            FieldType::Bytes(n) | FieldType::Pad(n) => *n,
        }
    }

    fn is_pad(&self) -> bool {
        matches!(self, FieldType::Pad(_))
    }
}

/// Parsed fixed-width field layout
#[derive(Debug, Clone)]
pub struct FieldLayout {
    fields: Vec<FieldType>,
    size: usize,
}

impl FieldLayout {
    /// Parse a layout string
    pub fn parse(spec: &str) -> Result<Self> {
        let mut fields = Vec::new();
        let mut count: Option<usize> = None;

        for (i, c) in spec.chars().enumerate() {
            match c {
                '<' if i == 0 => {}
                '0'..='9' => {
                    let digit = (c as u8 - b'0') as usize;
                    count = Some(count.unwrap_or(0) * 10 + digit);
                }
                's' => {
                    fields.push(FieldType::Bytes(count.take().unwrap_or(1)));
                }
                'x' => {
                    fields.push(FieldType::Pad(count.take().unwrap_or(1)));
                }
                'B' | 'H' | 'I' | 'Q' | '?' => {
                    let field = match c {
                        'B' => FieldType::U8,
                        'H' => FieldType::U16,
                        'I' => FieldType::U32,
                        'Q' => FieldType::U64,
                        _ => FieldType::Bool,
                    };
                    for _ in 0..count.take().unwrap_or(1) {
                        fields.push(field);
                    }
                }
                other => {
                    return Err(EspNowError::Parse(format!(
                        "unsupported layout code {other:?} in {spec:?}"
                    )));
                }
            }
        }
        if count.is_some() {
            return Err(EspNowError::Parse(format!(
                "dangling repeat count in layout {spec:?}"
            )));
        }

        let size = fields.iter().map(FieldType::size).sum();
        Ok(Self { fields, size })
    }

    /// Total byte size the layout covers
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of named (non-pad) fields
    pub fn field_count(&self) -> usize {
        self.fields.iter().filter(|f| !f.is_pad()).count()
    }

    /// Decode a message against the layout
    ///
    /// Returns each non-pad field's value and the byte range it came from,
    /// or `None` when the layout does not cover the exact message length.
    fn decode(&self, message: &[u8]) -> Option<Vec<(FieldValue, Range<usize>)>> {
        if message.len() != self.size {
            return None;
        }

        let mut decoded = Vec::with_capacity(self.fields.len());
        let mut offset = 0usize;
        for field in &self.fields {
            let end = offset + field.size();
            let raw = &message[offset..end];
            match field {
                FieldType::Pad(_) => {}
                FieldType::U8 => decoded.push((FieldValue::Uint(raw[0] as u64), offset..end)),
                FieldType::U16 => {
                    let v = u16::from_le_bytes([raw[0], raw[1]]);
                    decoded.push((FieldValue::Uint(v as u64), offset..end));
                }
                FieldType::U32 => {
                    let v = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                    decoded.push((FieldValue::Uint(v as u64), offset..end));
                }
                FieldType::U64 => {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(raw);
                    decoded.push((FieldValue::Uint(u64::from_le_bytes(b)), offset..end));
                }
                FieldType::Bool => decoded.push((FieldValue::Bool(raw[0] != 0), offset..end)),
                FieldType::Bytes(_) => {
                    decoded.push((FieldValue::Bytes(raw.to_vec()), offset..end));
                }
            }
            offset = end;
        }
        Some(decoded)
    }
}

/// A registered signature: the declarative spec plus its runtime state
pub struct Signature {
    spec: SignatureSpec,
    layout: FieldLayout,
    callback: SignatureCallback,
    ring: Option<RecentValueRing>,
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signature")
            .field("spec", &self.spec)
            .field("dedupe", &self.ring.is_some())
            .finish_non_exhaustive()
    }
}

impl Signature {
    /// The declarative specification
    pub fn spec(&self) -> &SignatureSpec {
        &self.spec
    }

    /// Length and byte-offset constraints against a message
    fn matches_constraints(&self, message: &[u8]) -> bool {
        if let Some(length) = self.spec.length {
            if message.len() != length {
                return false;
            }
        }
        self.spec
            .bytes
            .iter()
            .all(|(offset, value)| message.get(*offset) == Some(value))
    }

    /// Decode the message and assemble the output mapping
    ///
    /// Returns `None` when the layout does not match the message length;
    /// the caller treats that as no classification for this signature.
    pub fn extract(&self, message: &[u8]) -> Option<BTreeMap<String, FieldValue>> {
        let decoded = self.layout.decode(message)?;
        Some(self.build_mapping(&decoded))
    }

    fn build_mapping(
        &self,
        decoded: &[(FieldValue, Range<usize>)],
    ) -> BTreeMap<String, FieldValue> {
        let mut mapping = BTreeMap::new();
        for (name, (value, _)) in self.spec.fields.iter().zip(decoded) {
            match self.spec.effects.get(name) {
                Some(FieldEffect::PassThrough(true)) => {
                    mapping.insert(name.clone(), value.clone());
                }
                Some(FieldEffect::Lookup(table)) => {
                    if let Some(label) = value.as_u64().and_then(|v| table.get(&v)) {
                        mapping.insert(name.clone(), FieldValue::Text(label.clone()));
                    }
                }
                Some(FieldEffect::PassThrough(false)) | None => {}
            }
        }
        mapping
    }

    fn output(&self, message: &[u8], mapping: BTreeMap<String, FieldValue>) -> SignatureOutput {
        match self.spec.output {
            OutputMode::Raw => SignatureOutput::Raw(message.to_vec()),
            OutputMode::Hex => SignatureOutput::Hex(hex::encode(message)),
            OutputMode::Mapping => SignatureOutput::Mapping(mapping),
            OutputMode::Json => {
                SignatureOutput::Json(serde_json::to_string(&mapping).unwrap_or_default())
            }
        }
    }
}

/// Outcome of running a message through the signature table
pub enum MatchOutcome {
    /// A signature matched; invoke its callback with this output
    Dispatch(SignatureCallback, SignatureOutput),
    /// A signature matched but its private ring has seen this report
    Duplicate,
    /// No signature matched; fall through to the generic handler
    NoMatch,
}

/// Ordered table of registered signatures
#[derive(Debug, Default)]
pub struct SignatureMatcher {
    signatures: Vec<Signature>,
}

impl SignatureMatcher {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signature; matching honors registration order
    pub fn register(&mut self, spec: SignatureSpec, callback: SignatureCallback) -> Result<()> {
        let layout = FieldLayout::parse(&spec.layout)?;
        if layout.field_count() != spec.fields.len() {
            return Err(EspNowError::InvalidParameter(format!(
                "signature {:?}: layout has {} fields, {} names given",
                spec.name,
                layout.field_count(),
                spec.fields.len()
            )));
        }
        let ring = spec.dedupe.then(RecentValueRing::new);
        log::debug!("registered signature {:?}", spec.name);
        self.signatures.push(Signature {
            spec,
            layout,
            callback,
            ring,
        });
        Ok(())
    }

    /// Number of registered signatures
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// First signature whose constraints and layout both match the message
    pub fn classify(&self, message: &[u8]) -> Option<&Signature> {
        self.signatures
            .iter()
            .find(|sig| sig.matches_constraints(message) && sig.layout.decode(message).is_some())
    }

    /// Run a message through the table: classify, deduplicate, build output
    ///
    /// The returned callback is invoked by the caller after releasing any
    /// table lock, so a callback may re-enter the peer.
    pub fn process(&mut self, src: MacAddr, message: &[u8]) -> MatchOutcome {
        for sig in &mut self.signatures {
            if !sig.matches_constraints(message) {
                continue;
            }
            let Some(decoded) = sig.layout.decode(message) else {
                // Constraint match but layout mismatch: no classification,
                // fall through to the next signature
                continue;
            };

            if let Some(ring) = sig.ring.as_mut() {
                let mut key = src.octets().to_vec();
                if let Some((_, raw)) = decoded.last() {
                    key.extend_from_slice(&message[raw.clone()]);
                }
                if ring.seen(&key) {
                    log::debug!("duplicate {:?} report from {src}", sig.spec.name);
                    return MatchOutcome::Duplicate;
                }
            }

            let mapping = sig.build_mapping(&decoded);
            let output = sig.output(message, mapping);
            return MatchOutcome::Dispatch(Arc::clone(&sig.callback), output);
        }
        MatchOutcome::NoMatch
    }
}
