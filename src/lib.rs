pub mod bus;
pub mod bytes;
pub mod cryptography;
pub mod networking;
pub mod relay;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const SENDER_ID_SIZE: usize = 12;

/// Every record on the wire is exactly this many bytes.
pub const FRAME_SIZE: usize = 1400;

/// Record header: sender_id(12) + counter(4, BE) + timestamp(8, BE).
pub const RECORD_HEADER_SIZE: usize = SENDER_ID_SIZE + 4 + 8;

/// Length of the padded plaintext handed to the AEAD.
pub const PADDED_RECORD_SIZE: usize = FRAME_SIZE - NONCE_SIZE - TAG_SIZE;

/// Largest payload that still fits after the pad marker and record header.
pub const MAX_PAYLOAD_SIZE: usize = PADDED_RECORD_SIZE - 1 - RECORD_HEADER_SIZE;

/// Stdin chunk limit; kept strictly below MAX_PAYLOAD_SIZE.
pub const INPUT_CHUNK_SIZE: usize = MAX_PAYLOAD_SIZE - 1;

/// Freshness window for received timestamps (10 seconds, in nanoseconds).
pub const MAX_CLOCK_SKEW_NS: u64 = 10_000_000_000;
