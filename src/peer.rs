//! The ESP-NOW peer
//!
//! Ties the protocol engine together: owns the configuration, runs the
//! receive pipeline on frames handed over by the capture layer, and
//! implements the send operation. The capture layer invokes the pipeline
//! serially from its background thread; `send` runs on the caller's thread
//! and may block on the delivery tracker, which the pipeline signals.

use bytes::Bytes;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};

use crate::config::PeerConfig;
use crate::crypto::{CryptoEngine, KEY_LEN};
use crate::dedupe::RecentValueRing;
use crate::delivery::DeliveryTracker;
use crate::filter::CaptureFilterBuilder;
use crate::link::{CapturedFrame, FrameKind, MacAddr, MonitorLink};
use crate::signature::{MatchOutcome, SignatureCallback, SignatureMatcher, SignatureSpec};
use crate::wire::{FrameCodec, MAX_MESSAGE_LEN};
use crate::{EspNowError, Result};

/// Payload length of the placeholder substituted for undecryptable frames
const PLACEHOLDER_PAYLOAD_LEN: usize = 8;

/// Event delivered to the generic receive callback
#[derive(Debug, Clone)]
pub enum RxEvent {
    /// A decoded message that no signature claimed
    Message {
        /// Transmitter address
        src: MacAddr,
        /// Receiver address
        dst: MacAddr,
        /// Decoded message bytes
        payload: Bytes,
    },
    /// A delivery confirmation, surfaced when configured
    Delivered {
        /// Confirming peer
        src: MacAddr,
    },
}

/// Generic receive callback
pub type RxCallback = Arc<dyn Fn(RxEvent) + Send + Sync>;

/// Peer counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeerStats {
    /// Frames handed over by the capture layer
    pub frames_received: u64,
    /// Frames dropped by the address policy
    pub frames_filtered: u64,
    /// Messages decoded and dispatched
    pub messages_received: u64,
    /// Frames and device reports dropped as duplicates
    pub duplicates_dropped: u64,
    /// Encrypted frames that failed authentication
    pub decrypt_failures: u64,
    /// Data frames injected
    pub frames_sent: u64,
    /// Delivery confirmations received
    pub confirmations_received: u64,
}

/// Configuration fixed at preparation time
#[derive(Debug)]
struct PreparedConfig {
    local_addr: MacAddr,
    crypto: Option<CryptoEngine>,
}

/// A host-side ESP-NOW peer
pub struct EspNowPeer {
    config: PeerConfig,
    link: Arc<dyn MonitorLink>,
    prepared: OnceLock<PreparedConfig>,
    matcher: Mutex<SignatureMatcher>,
    global_ring: Mutex<RecentValueRing>,
    delivery: DeliveryTracker,
    callback: RwLock<Option<RxCallback>>,
    scratch: Mutex<Vec<u8>>,
    stats: Mutex<PeerStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl EspNowPeer {
    /// Create a peer over an opened capture handle
    pub fn new(config: PeerConfig, link: Arc<dyn MonitorLink>) -> Self {
        Self {
            config,
            link,
            prepared: OnceLock::new(),
            matcher: Mutex::new(SignatureMatcher::new()),
            global_ring: Mutex::new(RecentValueRing::new()),
            delivery: DeliveryTracker::new(),
            callback: RwLock::new(None),
            scratch: Mutex::new(Vec::new()),
            stats: Mutex::new(PeerStats::default()),
        }
    }

    /// The peer configuration
    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// Install the generic receive callback
    pub fn on_receive(&self, callback: RxCallback) {
        *self.callback.write().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Register a device signature; may be called at any time, including
    /// while the capture thread is classifying frames
    pub fn register_signature(
        &self,
        spec: SignatureSpec,
        callback: SignatureCallback,
    ) -> Result<()> {
        lock(&self.matcher).register(spec, callback)
    }

    /// Current counters
    pub fn stats(&self) -> PeerStats {
        lock(&self.stats).clone()
    }

    /// Resolved local address
    pub fn local_addr(&self) -> Result<MacAddr> {
        Ok(self.prepare()?.local_addr)
    }

    /// Resolve addressing and key material; idempotent, runs exactly once
    ///
    /// Fails when encryption is requested with missing or wrong-length key
    /// material; the peer refuses to operate half-configured.
    fn prepare(&self) -> Result<&PreparedConfig> {
        if self.prepared.get().is_none() {
            let built = self.build_prepared()?;
            let _ = self.prepared.set(built);
        }
        self.prepared
            .get()
            .ok_or_else(|| EspNowError::Config("peer preparation failed".to_string()))
    }

    fn build_prepared(&self) -> Result<PreparedConfig> {
        let local_addr = match self.config.local_addr {
            Some(addr) => addr,
            None => self.link.hardware_address()?,
        };

        let crypto = match (&self.config.primary_key, &self.config.local_key) {
            (Some(primary), Some(local)) => {
                let primary = key_bytes(primary, "primary_key")?;
                let local = key_bytes(local, "local_key")?;
                Some(CryptoEngine::new(&primary, &local))
            }
            (None, None) => None,
            _ => {
                return Err(EspNowError::Config(
                    "encryption requires both primary_key and local_key".to_string(),
                ))
            }
        };

        log::info!(
            "peer prepared: local {local_addr}, encryption {}",
            if crypto.is_some() { "on" } else { "off" }
        );
        Ok(PreparedConfig { local_addr, crypto })
    }

    /// Start the receive pipeline
    ///
    /// Builds the capture filter from the current configuration and asks the
    /// capture layer to begin delivering frames. Returns `Ok(false)` when
    /// capture startup did not come up within its timeout; the caller
    /// decides whether to retry.
    pub fn start(self: &Arc<Self>) -> Result<bool> {
        let prepared = self.prepare()?;
        let filter = CaptureFilterBuilder::new(prepared.local_addr)
            .accept_all(self.config.accept_all)
            .encrypted(prepared.crypto.is_some())
            .build();
        log::debug!("capture filter: {filter}");

        let peer = Arc::clone(self);
        let started = self
            .link
            .start_capture(&filter, Arc::new(move |frame| peer.handle_frame(frame)))?;
        if started {
            log::info!("capture started on {}", self.config.interface);
        } else {
            log::warn!("capture startup timed out on {}", self.config.interface);
        }
        Ok(started)
    }

    /// Net address accept policy
    fn allows(&self, kind: FrameKind, dst: MacAddr, local: MacAddr) -> bool {
        if kind == FrameKind::Data && self.config.accept_all {
            return true;
        }
        if dst == local {
            return true;
        }
        self.config.accept_broadcast && dst.is_broadcast()
    }

    /// Run the receive pipeline on one captured frame
    ///
    /// Invoked by the capture layer from its background thread, one frame at
    /// a time. Never panics on hostile input; undecodable or duplicate
    /// frames are dropped.
    pub fn handle_frame(&self, frame: CapturedFrame) {
        let Ok(prepared) = self.prepare() else {
            log::warn!("dropping frame: peer not prepared");
            return;
        };
        lock(&self.stats).frames_received += 1;

        if !self.allows(frame.kind, frame.dst, prepared.local_addr) {
            lock(&self.stats).frames_filtered += 1;
            return;
        }

        match frame.kind {
            FrameKind::Confirmation => self.handle_confirmation(frame.src),
            FrameKind::Data => self.handle_data(frame, prepared),
            FrameKind::Other(t, s) => {
                log::debug!("ignoring frame type {t}/{s:#x} from {}", frame.src);
            }
        }
    }

    fn handle_confirmation(&self, src: MacAddr) {
        lock(&self.stats).confirmations_received += 1;
        self.delivery.confirm();
        if self.config.surface_confirmations {
            if let Some(callback) = self.generic_callback() {
                callback(RxEvent::Delivered { src });
            }
        }
    }

    fn handle_data(&self, frame: CapturedFrame, prepared: &PreparedConfig) {
        let envelope = if frame.is_encrypted() {
            self.decrypt_or_placeholder(&frame, prepared)
        } else {
            let mut body = frame.payload.to_vec();
            // Some capture environments strip the leading category byte;
            // tolerate it rather than treating the frame as corrupt
            if FrameCodec::has_stripped_marker(&body) {
                body.insert(0, crate::wire::PROTOCOL_MARKER[0]);
            }
            body
        };

        if !FrameCodec::has_marker(&envelope) {
            // Broad encrypted-regime filters let unrelated action frames
            // through; this is where they get weeded out
            log::debug!("dropping non-protocol frame from {}", frame.src);
            lock(&self.stats).frames_filtered += 1;
            return;
        }

        let Some(nonce) = FrameCodec::nonce(&envelope) else {
            log::debug!("dropping truncated envelope from {}", frame.src);
            return;
        };
        if lock(&self.global_ring).seen(&nonce) {
            log::debug!("dropping resent envelope from {}", frame.src);
            lock(&self.stats).duplicates_dropped += 1;
            return;
        }

        let message = FrameCodec::decode(&envelope);
        lock(&self.stats).messages_received += 1;

        // Classify under the table lock, dispatch outside it
        let outcome = lock(&self.matcher).process(frame.src, &message);
        match outcome {
            MatchOutcome::Dispatch(callback, output) => callback(frame.src, output),
            MatchOutcome::Duplicate => {
                lock(&self.stats).duplicates_dropped += 1;
            }
            MatchOutcome::NoMatch => {
                if let Some(callback) = self.generic_callback() {
                    callback(RxEvent::Message {
                        src: frame.src,
                        dst: frame.dst,
                        payload: Bytes::from(message),
                    });
                }
            }
        }
    }

    /// Decrypt an encrypted frame body, or substitute a placeholder envelope
    /// over random bytes when decryption fails or no key is configured.
    /// Receipt of an undecryptable frame never aborts the pipeline.
    fn decrypt_or_placeholder(&self, frame: &CapturedFrame, prepared: &PreparedConfig) -> Vec<u8> {
        let packet_number = frame.packet_number.unwrap_or_default();
        match &prepared.crypto {
            Some(engine) => match engine.decrypt(&frame.payload, frame.src, packet_number) {
                Ok(plaintext) => plaintext,
                Err(_) => {
                    log::debug!("decryption failed for frame from {}", frame.src);
                    lock(&self.stats).decrypt_failures += 1;
                    placeholder_envelope()
                }
            },
            None => placeholder_envelope(),
        }
    }

    fn generic_callback(&self) -> Option<RxCallback> {
        self.callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Send one message
    pub fn send(&self, dst: MacAddr, payload: &[u8]) -> Result<bool> {
        self.send_with(dst, &[payload], None)
    }

    /// Send messages in order, with an optional per-call blocking override
    ///
    /// Each message is reset-encode-injected independently. When blocking
    /// applies (explicit override, or the peer default) and the destination
    /// is not broadcast (unless broadcast blocking is enabled), the call
    /// waits up to the confirmation timeout per message. The result is the
    /// logical AND of the per-message outcomes, vacuously true when nothing
    /// required confirmation. There is no retry beyond the single wait.
    pub fn send_with(&self, dst: MacAddr, payloads: &[&[u8]], block: Option<bool>) -> Result<bool> {
        let prepared = self.prepare()?;
        if prepared.crypto.is_some() {
            // Known unimplemented operation, rejected before anything is sent
            return Err(EspNowError::EncryptedSendUnsupported);
        }

        let blocking = block.unwrap_or(self.config.block);
        let wait_here = blocking && (!dst.is_broadcast() || self.config.block_broadcast);
        let delay = self.config.inter_frame_delay();

        let mut all_confirmed = true;
        for (i, payload) in payloads.iter().enumerate() {
            if payload.is_empty() || payload.len() > MAX_MESSAGE_LEN {
                return Err(EspNowError::InvalidParameter(format!(
                    "message length {} outside 1..={MAX_MESSAGE_LEN}",
                    payload.len()
                )));
            }

            self.delivery.reset();
            {
                let mut scratch = lock(&self.scratch);
                scratch.clear();
                FrameCodec::write_data_frame(&mut scratch, dst, prepared.local_addr, payload);
                self.link.inject(&scratch)?;
            }
            lock(&self.stats).frames_sent += 1;

            if wait_here {
                let confirmed = self.delivery.await_confirmation(self.config.confirm_timeout());
                if !confirmed {
                    log::debug!("no delivery confirmation from {dst}");
                }
                all_confirmed &= confirmed;
            }

            if i + 1 < payloads.len() && !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
        Ok(all_confirmed)
    }
}

/// Well-formed envelope over random payload bytes, substituted when an
/// encrypted frame cannot be decrypted
fn placeholder_envelope() -> Vec<u8> {
    let payload: [u8; PLACEHOLDER_PAYLOAD_LEN] = rand::random();
    FrameCodec::encode(&payload)
}

fn key_bytes(key: &str, name: &str) -> Result<[u8; KEY_LEN]> {
    key.as_bytes().try_into().map_err(|_| {
        EspNowError::Config(format!(
            "{name} must be exactly {KEY_LEN} bytes, got {}",
            key.len()
        ))
    })
}
