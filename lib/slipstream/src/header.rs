//! Routed-payload / session-keyed header: `sequence(8) | session_id(8) | session_version(1) |
//! tag(16)`, AEAD-sealed with AAD = `session_id ‖ session_version` and nonce =
//! `type_as_u32_le(4) ‖ sequence_u64_le(8)`. Bit-exact against `next_header.h`.

use flux::crypto::{self, KEY_SIZE, MAC_SIZE, NONCE_SIZE};

pub const HEADER_BYTES: usize = 8 + 8 + 1 + MAC_SIZE;

fn nonce_bytes(packet_type: u8, sequence: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0..4].copy_from_slice(&(packet_type as u32).to_le_bytes());
    nonce[4..12].copy_from_slice(&sequence.to_le_bytes());
    nonce
}

fn additional_data(session_id: u64, session_version: u8) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[0..8].copy_from_slice(&session_id.to_be_bytes());
    aad[8] = session_version;
    aad
}

/// Writes `sequence | session_id | session_version | tag` into `out` and seals `payload` in
/// place after it. `out` must be exactly `HEADER_BYTES + payload.len()` bytes.
pub fn write_sealed(
    out: &mut [u8],
    packet_type: u8,
    sequence: u64,
    session_id: u64,
    session_version: u8,
    payload: &[u8],
    key: &[u8; KEY_SIZE],
) -> bool {
    if out.len() != HEADER_BYTES + payload.len() {
        return false;
    }

    out[0..8].copy_from_slice(&sequence.to_be_bytes());
    out[8..16].copy_from_slice(&session_id.to_be_bytes());
    out[16] = session_version;

    let aad = additional_data(session_id, session_version);
    let nonce = nonce_bytes(packet_type, sequence);

    crypto::encrypt_with_nonce_bytes(&mut out[17..], payload, &aad, &nonce, key)
}

#[derive(Debug, Clone, Copy)]
pub struct HeaderFields {
    pub sequence: u64,
    pub session_id: u64,
    pub session_version: u8,
}

/// Reads the header fields and decrypts the payload in place. `data` must be at least
/// `HEADER_BYTES` bytes; `out_payload` must be exactly `data.len() - HEADER_BYTES` bytes.
/// Returns `None` on AEAD failure (tampering, wrong key, or truncated input).
pub fn read_sealed(
    data: &[u8],
    packet_type: u8,
    out_payload: &mut [u8],
    key: &[u8; KEY_SIZE],
) -> Option<HeaderFields> {
    if data.len() < HEADER_BYTES || out_payload.len() != data.len() - HEADER_BYTES {
        return None;
    }

    let sequence = u64::from_be_bytes(data[0..8].try_into().unwrap());
    let session_id = u64::from_be_bytes(data[8..16].try_into().unwrap());
    let session_version = data[16];

    let aad = additional_data(session_id, session_version);
    let nonce = nonce_bytes(packet_type, sequence);

    if !crypto::decrypt_with_nonce_bytes(out_payload, &data[17..], &aad, &nonce, key) {
        return None;
    }

    Some(HeaderFields { sequence, session_id, session_version })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = [5u8; KEY_SIZE];
        let payload = b"hello server";
        let mut buf = vec![0u8; HEADER_BYTES + payload.len()];

        assert!(write_sealed(&mut buf, 3, 77, 0xDEAD_BEEF, 2, payload, &key));

        let mut decoded = vec![0u8; payload.len()];
        let fields = read_sealed(&buf, 3, &mut decoded, &key).unwrap();

        assert_eq!(fields.sequence, 77);
        assert_eq!(fields.session_id, 0xDEAD_BEEF);
        assert_eq!(fields.session_version, 2);
        assert_eq!(&decoded[..], &payload[..]);
    }

    #[test]
    fn wrong_key_fails() {
        let key = [5u8; KEY_SIZE];
        let other = [6u8; KEY_SIZE];
        let payload = b"hello";
        let mut buf = vec![0u8; HEADER_BYTES + payload.len()];
        write_sealed(&mut buf, 4, 1, 9, 0, payload, &key);

        let mut decoded = vec![0u8; payload.len()];
        assert!(read_sealed(&buf, 4, &mut decoded, &other).is_none());
    }

    #[test]
    fn wrong_packet_type_fails_since_it_feeds_the_nonce() {
        let key = [5u8; KEY_SIZE];
        let payload = b"hello";
        let mut buf = vec![0u8; HEADER_BYTES + payload.len()];
        write_sealed(&mut buf, 4, 1, 9, 0, payload, &key);

        let mut decoded = vec![0u8; payload.len()];
        assert!(read_sealed(&buf, 3, &mut decoded, &key).is_none());
    }

    #[test]
    fn tampered_session_version_fails_since_it_feeds_the_aad() {
        let key = [5u8; KEY_SIZE];
        let payload = b"hello";
        let mut buf = vec![0u8; HEADER_BYTES + payload.len()];
        write_sealed(&mut buf, 4, 1, 9, 0, payload, &key);
        buf[16] = 1;

        let mut decoded = vec![0u8; payload.len()];
        assert!(read_sealed(&buf, 4, &mut decoded, &key).is_none());
    }
}
