use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use log::debug;
use rand::Rng;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::bytes::{pad_record, unpad_record};
use crate::{
    FRAME_SIZE, KEY_SIZE, MAX_CLOCK_SKEW_NS, MAX_PAYLOAD_SIZE, NONCE_SIZE, RECORD_HEADER_SIZE,
    SENDER_ID_SIZE,
};

/// Random per-process identity carried in every record header.
pub type SenderId = [u8; SENDER_ID_SIZE];

/// Per-frame codec failures. All of these are recoverable at the
/// granularity of one frame; only `TooLarge` indicates a caller bug.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload of {len} bytes exceeds the {max}-byte frame capacity")]
    TooLarge { len: usize, max: usize },

    #[error("frame is {len} bytes, expected {expected}")]
    BadLength { len: usize, expected: usize },

    #[error("frame failed AEAD authentication")]
    AuthFail,

    #[error("decrypted record has no padding marker or is short of a header")]
    Malformed,

    #[error("timestamp outside the freshness window")]
    Expired,

    #[error("stale timestamp for this sender (replay or reorder)")]
    ReplayOrReorder,

    #[error("counter gap for this sender: expected {expected}, got {got}")]
    CounterGap { expected: u32, got: u32 },
}

/// Failures loading the pre-shared key file. All fatal at startup.
#[derive(Debug, Error)]
pub enum PskError {
    #[error("failed to read PSK file: {0}")]
    Io(#[from] std::io::Error),

    #[error("PSK file is not valid hex: {0}")]
    BadHex(#[from] hex::FromHexError),

    #[error("PSK decodes to {len} bytes, expected {expected}")]
    BadLength { len: usize, expected: usize },
}

/// Load a hex-encoded 32-byte key from a file, tolerating surrounding
/// whitespace (a trailing newline is the common case).
pub fn load_psk(path: &Path) -> Result<[u8; KEY_SIZE], PskError> {
    let contents = std::fs::read_to_string(path)?;
    let decoded = hex::decode(contents.trim())?;
    let len = decoded.len();
    decoded
        .try_into()
        .map_err(|_| PskError::BadLength { len, expected: KEY_SIZE })
}

/// Local sender state. Written only by `encrypt`; `decrypt` never touches
/// it, even for a looped-back frame carrying our own id.
struct SelfState {
    last_clk: Option<u64>,
    last_ctr: u32,
}

/// Remote sender state, installed on the first accepted frame from an
/// identity and kept for the life of the process.
struct PeerState {
    last_clk: u64,
    last_ctr: u32,
}

/// PSK frame codec: seals local payloads into fixed-size authenticated
/// frames and opens peer frames while enforcing freshness, timestamp
/// monotonicity, and counter continuity per sender.
pub struct FrameCodec {
    cipher: ChaCha20Poly1305,
    self_id: SenderId,
    self_state: Mutex<SelfState>,
    peers: Mutex<HashMap<SenderId, PeerState>>,
}

/// Nanoseconds since the UNIX epoch.
fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl FrameCodec {
    /// Create a codec around a pre-shared key, drawing a fresh random
    /// sender identity for this process.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        let self_id: SenderId = rand::thread_rng().gen();
        FrameCodec {
            cipher: ChaCha20Poly1305::new(&key.into()),
            self_id,
            self_state: Mutex::new(SelfState { last_clk: None, last_ctr: 0 }),
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn sender_id(&self) -> SenderId {
        self.self_id
    }

    /// Seal a payload into a wire frame: `nonce(12) || AEAD(padded record)`.
    ///
    /// The timestamp is forced strictly past the previous one so that two
    /// frames sealed within the same clock tick still order correctly, and
    /// the counter advances by one (wrapping) per frame.
    pub fn encrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::TooLarge { len: payload.len(), max: MAX_PAYLOAD_SIZE });
        }

        // Timestamp bump and counter advance are one atomic step.
        let (ctr, clk) = {
            let mut state = self.self_state.lock().unwrap();
            let clk = match state.last_clk {
                Some(prev) => now_ns().max(prev + 1),
                None => now_ns(),
            };
            state.last_clk = Some(clk);
            let ctr = state.last_ctr;
            state.last_ctr = state.last_ctr.wrapping_add(1);
            (ctr, clk)
        };

        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
        record.extend_from_slice(&self.self_id);
        record.extend_from_slice(&ctr.to_be_bytes());
        record.extend_from_slice(&clk.to_be_bytes());
        record.extend_from_slice(payload);

        let padded = pad_record(&record);
        let nonce_bytes: [u8; NONCE_SIZE] = rand::thread_rng().gen();
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext =
            self.cipher.encrypt(&nonce, padded.as_ref()).map_err(|_| CodecError::AuthFail)?;

        let mut frame = Vec::with_capacity(FRAME_SIZE);
        frame.extend_from_slice(&nonce_bytes);
        frame.extend_from_slice(&ciphertext);
        debug_assert_eq!(frame.len(), FRAME_SIZE);
        Ok(frame)
    }

    /// Open a wire frame and validate it against the sender's state.
    ///
    /// Enforcement order: exact frame length, AEAD tag, record shape,
    /// loop-back rejection, freshness window, then per-sender timestamp
    /// monotonicity and counter continuity. A frame from an unknown sender
    /// that passes the freshness check installs that sender's state as-is.
    ///
    /// The state registry is only advanced when every check passes, so a
    /// rejected frame leaves the sender exactly where it was.
    pub fn decrypt(&self, frame: &[u8]) -> Result<(SenderId, Vec<u8>), CodecError> {
        if frame.len() != FRAME_SIZE {
            return Err(CodecError::BadLength { len: frame.len(), expected: FRAME_SIZE });
        }

        let nonce = Nonce::from_slice(&frame[..NONCE_SIZE]);
        let padded = self
            .cipher
            .decrypt(nonce, &frame[NONCE_SIZE..])
            .map_err(|_| CodecError::AuthFail)?;

        let record = unpad_record(&padded).ok_or(CodecError::Malformed)?;
        if record.len() < RECORD_HEADER_SIZE {
            return Err(CodecError::Malformed);
        }

        let mut sender: SenderId = [0u8; SENDER_ID_SIZE];
        sender.copy_from_slice(&record[..SENDER_ID_SIZE]);
        let ctr = u32::from_be_bytes(record[SENDER_ID_SIZE..SENDER_ID_SIZE + 4].try_into().unwrap());
        let clk = u64::from_be_bytes(
            record[SENDER_ID_SIZE + 4..RECORD_HEADER_SIZE].try_into().unwrap(),
        );
        let payload = record[RECORD_HEADER_SIZE..].to_vec();

        // A frame claiming our own id is our own traffic reflected back
        // through the mesh. The self-state stays untouched.
        if sender == self.self_id {
            return Err(CodecError::ReplayOrReorder);
        }

        if now_ns().abs_diff(clk) > MAX_CLOCK_SKEW_NS {
            return Err(CodecError::Expired);
        }

        let mut peers = self.peers.lock().unwrap();
        match peers.get_mut(&sender) {
            Some(state) => {
                if clk <= state.last_clk {
                    return Err(CodecError::ReplayOrReorder);
                }
                let expected = state.last_ctr.wrapping_add(1);
                if ctr != expected {
                    return Err(CodecError::CounterGap { expected, got: ctr });
                }
                state.last_clk = clk;
                state.last_ctr = ctr;
            }
            None => {
                debug!("first frame from sender {}", hex::encode(sender));
                peers.insert(sender, PeerState { last_clk: clk, last_ctr: ctr });
            }
        }

        Ok((sender, payload))
    }

    #[cfg(test)]
    pub(crate) fn set_self_counter(&self, ctr: u32) {
        self.self_state.lock().unwrap().last_ctr = ctr;
    }
}

// Testing Suite:
// - Cross-codec round trips, empty payloads, fixed frame size
// - Tamper / wrong-key / truncation handling and state preservation
// - Replay, reorder, counter-gap, counter-wrap, loop-back rejection
// - Freshness window on both stale and future timestamps
// - PSK file parsing
