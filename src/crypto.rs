//! Session key derivation and authenticated decryption
//!
//! ESP-NOW peers share two 16-byte secrets; the session key is the primary
//! key's single-block AES encryption of the local key. This mirrors what the
//! embedded firmware does and is taken as a given, not a proper KDF.
//! Encrypted frames use AES-128-CCM with an 8-byte tag and a 13-byte nonce
//! assembled from the source address and the CCMP packet number.
//!
//! Only receiving is supported; sending encrypted messages is rejected at
//! the peer level.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use ccm::aead::{Aead, Payload};
use ccm::consts::{U13, U8};
use ccm::Ccm;

use crate::link::MacAddr;
use crate::wire::PROTOCOL_MARKER;
use crate::{EspNowError, Result};

/// Length of the primary/local secrets and the derived session key
pub const KEY_LEN: usize = 16;

/// Authentication tag length appended to encrypted frame bodies
pub const TAG_LEN: usize = 8;

/// CCM nonce length: flags byte + source address + packet number
pub const NONCE_LEN: usize = 13;

type Aes128Ccm8 = Ccm<Aes128, U8, U13>;

/// Decryption engine bound to one derived session key
#[derive(Clone)]
pub struct CryptoEngine {
    session_key: [u8; KEY_LEN],
}

impl std::fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs
        f.debug_struct("CryptoEngine").finish_non_exhaustive()
    }
}

impl CryptoEngine {
    /// Create an engine from the two configured secrets
    pub fn new(primary: &[u8; KEY_LEN], local: &[u8; KEY_LEN]) -> Self {
        Self {
            session_key: Self::derive_key(primary, local),
        }
    }

    /// Derive the session key: single-block AES-128 encryption of the local
    /// key using the primary key
    pub fn derive_key(primary: &[u8; KEY_LEN], local: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
        let cipher = Aes128::new(GenericArray::from_slice(primary));
        let mut block = GenericArray::clone_from_slice(local);
        cipher.encrypt_block(&mut block);
        block.into()
    }

    /// The derived session key
    pub fn session_key(&self) -> &[u8; KEY_LEN] {
        &self.session_key
    }

    /// Authenticated decryption of an encrypted frame body
    ///
    /// `ciphertext` is the frame body with the 8-byte tag still attached.
    /// `packet_number` holds the CCMP PN bytes as the capture layer parses
    /// them (PN0..PN5, least significant first); the nonce wants them in
    /// big-endian order. Plaintext that does not begin with the protocol
    /// marker is rejected the same way a failed tag check is.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        src: MacAddr,
        packet_number: [u8; 6],
    ) -> Result<Vec<u8>> {
        let nonce = Self::nonce(src, packet_number);
        let cipher = Aes128Ccm8::new(GenericArray::from_slice(&self.session_key));

        let plaintext = cipher
            .decrypt(
                GenericArray::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: &[],
                },
            )
            .map_err(|_| EspNowError::DecryptionFailed)?;

        if !plaintext.starts_with(&PROTOCOL_MARKER) {
            return Err(EspNowError::DecryptionFailed);
        }
        Ok(plaintext)
    }

    /// Assemble the 13-byte CCM nonce
    pub fn nonce(src: MacAddr, packet_number: [u8; 6]) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[1..7].copy_from_slice(&src.octets());
        for (i, byte) in packet_number.iter().rev().enumerate() {
            nonce[7 + i] = *byte;
        }
        nonce
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::FrameCodec;

    fn engine() -> CryptoEngine {
        CryptoEngine::new(b"0u4hgz7pgct3gnv8", b"a3o4csuv2bpvr0wu")
    }

    fn encrypt(engine: &CryptoEngine, plaintext: &[u8], src: MacAddr, pn: [u8; 6]) -> Vec<u8> {
        let nonce = CryptoEngine::nonce(src, pn);
        let cipher = Aes128Ccm8::new(GenericArray::from_slice(engine.session_key()));
        cipher
            .encrypt(
                GenericArray::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .unwrap()
    }

    #[test]
    fn test_derive_key_fips_197_vector() {
        // FIPS-197 appendix C.1
        let primary: [u8; 16] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ];
        let local: [u8; 16] = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ];
        let derived = CryptoEngine::derive_key(&primary, &local);
        assert_eq!(hex::encode(derived), "69c4e0d86a7b0430d8cdb78070b4c55a");
    }

    #[test]
    fn test_derive_key_deterministic() {
        let a = CryptoEngine::derive_key(b"0u4hgz7pgct3gnv8", b"a3o4csuv2bpvr0wu");
        let b = CryptoEngine::derive_key(b"0u4hgz7pgct3gnv8", b"a3o4csuv2bpvr0wu");
        let c = CryptoEngine::derive_key(b"0u4hgz7pgct3gnv9", b"a3o4csuv2bpvr0wu");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_nonce_layout() {
        let src = MacAddr([0xe0, 0x5a, 0x1b, 0x11, 0x22, 0x33]);
        let nonce = CryptoEngine::nonce(src, [1, 2, 3, 4, 5, 6]);
        assert_eq!(nonce[0], 0);
        assert_eq!(&nonce[1..7], &src.octets());
        assert_eq!(&nonce[7..13], &[6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_decrypt_round_trip() {
        let engine = engine();
        let src = MacAddr([0xe0, 0x5a, 0x1b, 0x11, 0x22, 0x33]);
        let pn = [9, 0, 0, 0, 0, 0];
        let envelope = FrameCodec::encode(b"hello over ccm");

        let ciphertext = encrypt(&engine, &envelope, src, pn);
        let plaintext = engine.decrypt(&ciphertext, src, pn).unwrap();
        assert_eq!(plaintext, envelope);
        assert_eq!(FrameCodec::decode(&plaintext), b"hello over ccm");
    }

    #[test]
    fn test_tampered_tag_fails() {
        let engine = engine();
        let src = MacAddr([0xe0, 0x5a, 0x1b, 0x11, 0x22, 0x33]);
        let pn = [9, 0, 0, 0, 0, 0];
        let mut ciphertext = encrypt(&engine, &FrameCodec::encode(b"x"), src, pn);
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;

        assert!(matches!(
            engine.decrypt(&ciphertext, src, pn),
            Err(EspNowError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_packet_number_fails() {
        let engine = engine();
        let src = MacAddr([0xe0, 0x5a, 0x1b, 0x11, 0x22, 0x33]);
        let ciphertext = encrypt(&engine, &FrameCodec::encode(b"x"), src, [1, 0, 0, 0, 0, 0]);
        assert!(engine.decrypt(&ciphertext, src, [2, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_plaintext_without_marker_rejected() {
        let engine = engine();
        let src = MacAddr([0; 6]);
        let pn = [0; 6];
        let ciphertext = encrypt(&engine, b"no marker here", src, pn);
        assert!(matches!(
            engine.decrypt(&ciphertext, src, pn),
            Err(EspNowError::DecryptionFailed)
        ));
    }
}
