use crate::PADDED_RECORD_SIZE;

/// Marker byte separating the zero padding from the record proper.
const PAD_MARKER: u8 = 0x01;

/// Pad a record out to the fixed AEAD-plaintext size.
///
/// The record is prefixed with a single 0x01 marker and left-padded with
/// 0x00 bytes, so every plaintext handed to the cipher is exactly
/// `PADDED_RECORD_SIZE` bytes regardless of payload length.
///
/// # Panics
/// Panics if the record does not leave room for the marker. The codec
/// checks payload size before assembling a record, so this is unreachable
/// from the encrypt path.
pub fn pad_record(record: &[u8]) -> Vec<u8> {
    assert!(
        record.len() < PADDED_RECORD_SIZE,
        "record of {} bytes cannot be padded to {}",
        record.len(),
        PADDED_RECORD_SIZE
    );

    let pad_len = PADDED_RECORD_SIZE - 1 - record.len();
    let mut padded = vec![0u8; PADDED_RECORD_SIZE];
    padded[pad_len] = PAD_MARKER;
    padded[pad_len + 1..].copy_from_slice(record);
    padded
}

/// Strip the padding from a decrypted record.
///
/// Scans from the front for the first 0x01 marker and returns everything
/// strictly after it. Returns `None` if no marker is present (a record no
/// honest sender produces).
pub fn unpad_record(padded: &[u8]) -> Option<&[u8]> {
    let marker = padded.iter().position(|&b| b == PAD_MARKER)?;
    Some(&padded[marker + 1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MAX_PAYLOAD_SIZE, RECORD_HEADER_SIZE};

    #[test]
    fn test_pad_unpad_roundtrip() {
        let record = b"sender-id-12ctr4clock-8-payload bytes";
        let padded = pad_record(record);

        assert_eq!(padded.len(), PADDED_RECORD_SIZE);
        assert_eq!(unpad_record(&padded), Some(&record[..]));
    }

    #[test]
    fn test_pad_empty_record() {
        let padded = pad_record(b"");

        assert_eq!(padded.len(), PADDED_RECORD_SIZE);
        assert_eq!(unpad_record(&padded), Some(&b""[..]));
    }

    #[test]
    fn test_pad_maximum_record() {
        // Largest record the codec ever assembles: header + max payload.
        let record = vec![0xAB; RECORD_HEADER_SIZE + MAX_PAYLOAD_SIZE];
        let padded = pad_record(&record);

        // Marker lands in the very first byte; no zero padding remains.
        assert_eq!(padded[0], 0x01);
        assert_eq!(unpad_record(&padded), Some(&record[..]));
    }

    #[test]
    fn test_unpad_missing_marker() {
        let all_zero = vec![0u8; PADDED_RECORD_SIZE];
        assert_eq!(unpad_record(&all_zero), None);
    }

    #[test]
    fn test_unpad_stops_at_first_marker() {
        // Marker bytes inside the record body must survive unpadding.
        let record = [0x00, 0x01, 0x02, 0x01];
        let padded = pad_record(&record);
        assert_eq!(unpad_record(&padded), Some(&record[..]));
    }

    #[test]
    #[should_panic]
    fn test_pad_oversized_record_panics() {
        pad_record(&vec![0u8; PADDED_RECORD_SIZE]);
    }
}
