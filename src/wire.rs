//! ESP-NOW wire envelope encoding and decoding
//!
//! The envelope rides in the body of a vendor-specific 802.11 action frame:
//! a fixed 4-byte marker (vendor action category byte plus the Espressif
//! OUI), a 4-byte random value used for replay suppression, then one or more
//! vendor elements each carrying up to 250 payload bytes.

use bytes::BufMut;

use crate::link::MacAddr;

/// Fixed envelope marker: vendor action category byte + Espressif OUI
pub const PROTOCOL_MARKER: [u8; 4] = [0x7f, 0x18, 0xfe, 0x34];

/// Vendor OUI repeated inside every element
pub const VENDOR_CODE: [u8; 3] = [0x18, 0xfe, 0x34];

/// Vendor-specific element tag
pub const ELEMENT_TAG: u8 = 0xdd;

/// OUI subtype identifying ESP-NOW inside the vendor element
pub const ELEMENT_TYPE: u8 = 0x04;

/// Version byte for a single-fragment message
pub const VERSION_SINGLE: u8 = 0x01;

/// Version byte for a multi-fragment message
pub const VERSION_MULTI: u8 = 0x02;

/// Maximum payload bytes carried by one element
pub const MAX_CHUNK: usize = 250;

/// Per-element sub-header: tag, length, OUI, subtype, version
pub const ELEMENT_HEADER_LEN: usize = 7;

/// Fixed prefix before the first payload byte: marker + random + sub-header
pub const ENVELOPE_HEADER_LEN: usize = 4 + 4 + ELEMENT_HEADER_LEN;

/// Reassembly stride: one full chunk plus the next element's sub-header
pub const STRIDE: usize = MAX_CHUNK + ELEMENT_HEADER_LEN;

/// Maximum logical message length
pub const MAX_MESSAGE_LEN: usize = 1427;

/// Length of the minimal radiotap header prepended to injected frames
const RADIOTAP_LEN: usize = 8;

/// 802.11 management header length
const DOT11_HEADER_LEN: usize = 24;

/// Frame control bytes for a management action frame
const ACTION_FRAME_CONTROL: [u8; 2] = [0xd0, 0x00];

/// Encoder/decoder for ESP-NOW wire envelopes
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a message into a wire envelope with a fresh random value
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        Self::encode_with_nonce(payload, rand::random())
    }

    /// Encode a message into a wire envelope with a caller-supplied random value
    pub fn encode_with_nonce(payload: &[u8], nonce: [u8; 4]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENVELOPE_HEADER_LEN + payload.len());
        Self::write_envelope(&mut buf, payload, nonce);
        buf
    }

    /// Write a wire envelope into an existing buffer
    pub fn write_envelope(buf: &mut Vec<u8>, payload: &[u8], nonce: [u8; 4]) {
        buf.put_slice(&PROTOCOL_MARKER);
        buf.put_slice(&nonce);

        let multi = payload.len() > MAX_CHUNK;
        let version = if multi { VERSION_MULTI } else { VERSION_SINGLE };

        let mut wrote_any = false;
        for chunk in payload.chunks(MAX_CHUNK) {
            Self::write_element(buf, chunk, version);
            wrote_any = true;
        }

        // Empty message still carries one zero-length element
        if !wrote_any {
            Self::write_element(buf, &[], VERSION_SINGLE);
        }
    }

    fn write_element(buf: &mut Vec<u8>, chunk: &[u8], version: u8) {
        buf.put_u8(ELEMENT_TAG);
        buf.put_u8((5 + chunk.len()) as u8);
        buf.put_slice(&VENDOR_CODE);
        buf.put_u8(ELEMENT_TYPE);
        buf.put_u8(version);
        buf.put_slice(chunk);
    }

    /// Decode a wire envelope back into message bytes
    ///
    /// Skips the fixed header, then treats the remainder as fixed-stride
    /// blocks of [`STRIDE`] bytes: the first [`MAX_CHUNK`] bytes of every
    /// stride are payload, the trailing bytes are the next element's
    /// sub-header. The final stride may be shorter than a full stride. A
    /// single-fragment envelope occupies exactly one (possibly short)
    /// stride, so the same rule covers both versions.
    ///
    /// Malformed input yields garbage rather than an error; the wire format
    /// carries no redundancy that would let the decoder tell.
    pub fn decode(envelope: &[u8]) -> Vec<u8> {
        if envelope.len() <= ENVELOPE_HEADER_LEN {
            return Vec::new();
        }

        let body = &envelope[ENVELOPE_HEADER_LEN..];
        let mut message = Vec::with_capacity(body.len());
        for stride in body.chunks(STRIDE) {
            let take = stride.len().min(MAX_CHUNK);
            message.extend_from_slice(&stride[..take]);
        }
        message
    }

    /// Extract the 4-byte random value from an envelope
    pub fn nonce(envelope: &[u8]) -> Option<[u8; 4]> {
        envelope.get(4..8).map(|b| [b[0], b[1], b[2], b[3]])
    }

    /// Whether a frame body begins with the protocol marker
    pub fn has_marker(body: &[u8]) -> bool {
        body.starts_with(&PROTOCOL_MARKER)
    }

    /// Whether a frame body looks like an envelope whose leading category
    /// byte was stripped by the capture layer
    pub fn has_stripped_marker(body: &[u8]) -> bool {
        body.starts_with(&PROTOCOL_MARKER[1..])
    }

    /// Build a complete injectable data frame: minimal radiotap header,
    /// 802.11 action frame header, and the wire envelope over `payload`
    pub fn write_data_frame(buf: &mut Vec<u8>, dst: MacAddr, src: MacAddr, payload: &[u8]) {
        buf.reserve(RADIOTAP_LEN + DOT11_HEADER_LEN + ENVELOPE_HEADER_LEN + payload.len());

        // Minimal radiotap header: version 0, no fields present
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u16_le(RADIOTAP_LEN as u16);
        buf.put_u32_le(0);

        buf.put_slice(&ACTION_FRAME_CONTROL);
        buf.put_u16_le(0); // duration
        buf.put_slice(&dst.octets());
        buf.put_slice(&src.octets());
        buf.put_slice(&crate::link::BROADCAST_ADDR.octets());
        buf.put_u16_le(0); // sequence control

        Self::write_envelope(buf, payload, rand::random());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_round_trip_lengths() {
        for len in [0usize, 1, 250, 251, 1427] {
            let payload = pattern(len);
            let envelope = FrameCodec::encode(&payload);
            assert_eq!(FrameCodec::decode(&envelope), payload, "length {len}");
        }
    }

    #[test]
    fn test_single_fragment_layout() {
        let payload = pattern(250);
        let envelope = FrameCodec::encode_with_nonce(&payload, [1, 2, 3, 4]);

        assert_eq!(&envelope[..4], &PROTOCOL_MARKER);
        assert_eq!(&envelope[4..8], &[1, 2, 3, 4]);
        assert_eq!(envelope[8], ELEMENT_TAG);
        assert_eq!(envelope[9], 255); // 5 + 250
        assert_eq!(&envelope[10..13], &VENDOR_CODE);
        assert_eq!(envelope[13], ELEMENT_TYPE);
        assert_eq!(envelope[14], VERSION_SINGLE);
        assert_eq!(envelope.len(), ENVELOPE_HEADER_LEN + 250);
    }

    #[test]
    fn test_fragmentation_boundary() {
        let envelope = FrameCodec::encode(&pattern(251));

        // Two elements, both tagged multi-fragment
        assert_eq!(envelope[14], VERSION_MULTI);
        let second = ENVELOPE_HEADER_LEN + 250;
        assert_eq!(envelope[second], ELEMENT_TAG);
        assert_eq!(envelope[second + 1], 6); // 5 + 1
        assert_eq!(envelope[second + 6], VERSION_MULTI);
        assert_eq!(envelope.len(), second + ELEMENT_HEADER_LEN + 1);
    }

    #[test]
    fn test_empty_payload_is_zero_length_element() {
        let envelope = FrameCodec::encode_with_nonce(&[], [0; 4]);
        assert_eq!(envelope.len(), ENVELOPE_HEADER_LEN);
        assert_eq!(envelope[9], 5); // length byte covers only OUI + subtype + version
        assert_eq!(envelope[14], VERSION_SINGLE);
        assert!(FrameCodec::decode(&envelope).is_empty());
    }

    #[test]
    fn test_nonce_extraction() {
        let envelope = FrameCodec::encode_with_nonce(b"hi", [9, 8, 7, 6]);
        assert_eq!(FrameCodec::nonce(&envelope), Some([9, 8, 7, 6]));
        assert_eq!(FrameCodec::nonce(&[0; 5]), None);
    }

    #[test]
    fn test_marker_detection() {
        let envelope = FrameCodec::encode(b"x");
        assert!(FrameCodec::has_marker(&envelope));
        assert!(FrameCodec::has_stripped_marker(&envelope[1..]));
        assert!(!FrameCodec::has_marker(&envelope[1..]));
    }

    #[test]
    fn test_short_input_decodes_empty() {
        assert!(FrameCodec::decode(&[]).is_empty());
        assert!(FrameCodec::decode(&PROTOCOL_MARKER).is_empty());
    }

    #[test]
    fn test_data_frame_header() {
        let dst = MacAddr([0xe0, 0x5a, 0x1b, 0x33, 0x22, 0x11]);
        let src = MacAddr([0xe0, 0x5a, 0x1b, 0x11, 0x22, 0x33]);
        let mut frame = Vec::new();
        FrameCodec::write_data_frame(&mut frame, dst, src, b"hello");

        // Radiotap header, then the management header
        assert_eq!(frame[2], 8);
        assert_eq!(&frame[8..10], &[0xd0, 0x00]);
        assert_eq!(&frame[12..18], &dst.octets());
        assert_eq!(&frame[18..24], &src.octets());
        assert_eq!(&frame[24..30], &[0xff; 6]);

        // Envelope begins right after the header and round-trips
        let body = &frame[8 + 24..];
        assert!(FrameCodec::has_marker(body));
        assert_eq!(FrameCodec::decode(body), b"hello");
    }
}
