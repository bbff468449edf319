//! Route and continue tokens: opaque per-hop routing directives minted by the backend,
//! encrypted to each hop's secret with XChaCha20-Poly1305-IETF. Bit-exact against
//! `next_route_token.h`/`next_continue_token.h` for the meaningful fields; the route token's
//! extra reserved bytes (documented in SPEC_FULL.md/DESIGN.md) are written as zero and ignored
//! on read.

use crate::address::Address;
use flux::crypto::{self, XCHACHA_KEY_SIZE, XCHACHA_MAC_SIZE, XCHACHA_NONCE_SIZE};

pub const SESSION_PRIVATE_KEY_SIZE: usize = 32;

/// Meaningful plaintext fields, bit-exact against `next_route_token_t`.
pub const ROUTE_TOKEN_CORE_BYTES: usize = 32 + 8 + 8 + 4 + 4 + 4 + 4 + 2 + 2 + 1 + 1 + 1;
/// Reserved chain-encoding padding folded into the wire size (§6 of the spec).
pub const ROUTE_TOKEN_RESERVED_BYTES: usize = 111 - ROUTE_TOKEN_CORE_BYTES;
pub const ROUTE_TOKEN_PLAIN_BYTES: usize = ROUTE_TOKEN_CORE_BYTES + ROUTE_TOKEN_RESERVED_BYTES;
pub const ENCRYPTED_ROUTE_TOKEN_BYTES: usize =
    XCHACHA_NONCE_SIZE + ROUTE_TOKEN_PLAIN_BYTES + XCHACHA_MAC_SIZE;

pub const CONTINUE_TOKEN_PLAIN_BYTES: usize = 8 + 8 + 1;
pub const ENCRYPTED_CONTINUE_TOKEN_BYTES: usize =
    XCHACHA_NONCE_SIZE + CONTINUE_TOKEN_PLAIN_BYTES + XCHACHA_MAC_SIZE;

/// Maximum chain length (`NEXT_MAX_TOKENS`): client + up to 5 relays + server.
pub const MAX_TOKENS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteToken {
    pub session_private_key: [u8; SESSION_PRIVATE_KEY_SIZE],
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub kbps_up: u32,
    pub kbps_down: u32,
    pub next_address: Address,
    pub prev_address: Address,
    pub session_version: u8,
    pub next_internal: bool,
    pub prev_internal: bool,
}

impl RouteToken {
    fn write_plain(&self, buf: &mut [u8; ROUTE_TOKEN_PLAIN_BYTES]) {
        let mut offset = 0;
        buf[offset..offset + 32].copy_from_slice(&self.session_private_key);
        offset += 32;
        buf[offset..offset + 8].copy_from_slice(&self.expire_timestamp.to_be_bytes());
        offset += 8;
        buf[offset..offset + 8].copy_from_slice(&self.session_id.to_be_bytes());
        offset += 8;
        buf[offset..offset + 4].copy_from_slice(&self.kbps_up.to_be_bytes());
        offset += 4;
        buf[offset..offset + 4].copy_from_slice(&self.kbps_down.to_be_bytes());
        offset += 4;
        buf[offset..offset + 4].copy_from_slice(&self.next_address.v4_octets_be());
        offset += 4;
        buf[offset..offset + 4].copy_from_slice(&self.prev_address.v4_octets_be());
        offset += 4;
        buf[offset..offset + 2].copy_from_slice(&self.next_address.port().to_be_bytes());
        offset += 2;
        buf[offset..offset + 2].copy_from_slice(&self.prev_address.port().to_be_bytes());
        offset += 2;
        buf[offset] = self.session_version;
        offset += 1;
        buf[offset] = self.next_internal as u8;
        offset += 1;
        buf[offset] = self.prev_internal as u8;
        // remaining bytes (reserved padding) stay zero
    }

    fn read_plain(buf: &[u8; ROUTE_TOKEN_PLAIN_BYTES]) -> Self {
        let mut offset = 0;
        let mut session_private_key = [0u8; SESSION_PRIVATE_KEY_SIZE];
        session_private_key.copy_from_slice(&buf[offset..offset + 32]);
        offset += 32;
        let expire_timestamp = u64::from_be_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let session_id = u64::from_be_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let kbps_up = u32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let kbps_down = u32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let next_octets: [u8; 4] = buf[offset..offset + 4].try_into().unwrap();
        offset += 4;
        let prev_octets: [u8; 4] = buf[offset..offset + 4].try_into().unwrap();
        offset += 4;
        let next_port = u16::from_be_bytes(buf[offset..offset + 2].try_into().unwrap());
        offset += 2;
        let prev_port = u16::from_be_bytes(buf[offset..offset + 2].try_into().unwrap());
        offset += 2;
        let session_version = buf[offset];
        offset += 1;
        let next_internal = buf[offset] != 0;
        offset += 1;
        let prev_internal = buf[offset] != 0;

        RouteToken {
            session_private_key,
            expire_timestamp,
            session_id,
            kbps_up,
            kbps_down,
            next_address: Address::from_v4_be(next_octets, next_port),
            prev_address: Address::from_v4_be(prev_octets, prev_port),
            session_version,
            next_internal,
            prev_internal,
        }
    }

    /// Encrypts this token under `hop_key`, producing the bit-exact on-wire blob.
    pub fn encrypt(&self, hop_key: &[u8; XCHACHA_KEY_SIZE]) -> [u8; ENCRYPTED_ROUTE_TOKEN_BYTES] {
        let mut plain = [0u8; ROUTE_TOKEN_PLAIN_BYTES];
        self.write_plain(&mut plain);

        let mut out = [0u8; ENCRYPTED_ROUTE_TOKEN_BYTES];
        crypto::xchacha_encrypt(&mut out, &plain, hop_key);
        out
    }

    /// Decrypts a token minted for this hop. Returns `None` on AEAD failure.
    pub fn decrypt(encrypted: &[u8], hop_key: &[u8; XCHACHA_KEY_SIZE]) -> Option<Self> {
        if encrypted.len() != ENCRYPTED_ROUTE_TOKEN_BYTES {
            return None;
        }

        let mut plain = [0u8; ROUTE_TOKEN_PLAIN_BYTES];
        if !crypto::xchacha_decrypt(&mut plain, encrypted, hop_key) {
            return None;
        }

        Some(RouteToken::read_plain(&plain))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinueToken {
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub session_version: u8,
}

impl ContinueToken {
    pub fn encrypt(&self, hop_key: &[u8; XCHACHA_KEY_SIZE]) -> [u8; ENCRYPTED_CONTINUE_TOKEN_BYTES] {
        let mut plain = [0u8; CONTINUE_TOKEN_PLAIN_BYTES];
        plain[0..8].copy_from_slice(&self.expire_timestamp.to_be_bytes());
        plain[8..16].copy_from_slice(&self.session_id.to_be_bytes());
        plain[16] = self.session_version;

        let mut out = [0u8; ENCRYPTED_CONTINUE_TOKEN_BYTES];
        crypto::xchacha_encrypt(&mut out, &plain, hop_key);
        out
    }

    pub fn decrypt(encrypted: &[u8], hop_key: &[u8; XCHACHA_KEY_SIZE]) -> Option<Self> {
        if encrypted.len() != ENCRYPTED_CONTINUE_TOKEN_BYTES {
            return None;
        }

        let mut plain = [0u8; CONTINUE_TOKEN_PLAIN_BYTES];
        if !crypto::xchacha_decrypt(&mut plain, encrypted, hop_key) {
            return None;
        }

        Some(ContinueToken {
            expire_timestamp: u64::from_be_bytes(plain[0..8].try_into().unwrap()),
            session_id: u64::from_be_bytes(plain[8..16].try_into().unwrap()),
            session_version: plain[16],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token() -> RouteToken {
        RouteToken {
            session_private_key: [9u8; SESSION_PRIVATE_KEY_SIZE],
            expire_timestamp: 1_700_000_000,
            session_id: 0xDEAD_BEEF,
            kbps_up: 1000,
            kbps_down: 2000,
            next_address: "10.0.0.1:40000".parse().unwrap(),
            prev_address: "10.0.0.2:40001".parse().unwrap(),
            session_version: 3,
            next_internal: true,
            prev_internal: false,
        }
    }

    #[test]
    fn route_token_round_trip() {
        let key = [1u8; XCHACHA_KEY_SIZE];
        let token = sample_token();
        let encrypted = token.encrypt(&key);
        let decoded = RouteToken::decrypt(&encrypted, &key).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn route_token_rejects_wrong_key() {
        let key = [1u8; XCHACHA_KEY_SIZE];
        let other = [2u8; XCHACHA_KEY_SIZE];
        let encrypted = sample_token().encrypt(&key);
        assert!(RouteToken::decrypt(&encrypted, &other).is_none());
    }

    #[test]
    fn continue_token_round_trip() {
        let key = [4u8; XCHACHA_KEY_SIZE];
        let token = ContinueToken { expire_timestamp: 123, session_id: 456, session_version: 7 };
        let encrypted = token.encrypt(&key);
        let decoded = ContinueToken::decrypt(&encrypted, &key).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn wire_sizes_match_spec() {
        assert_eq!(ENCRYPTED_ROUTE_TOKEN_BYTES, 151);
        assert_eq!(ENCRYPTED_CONTINUE_TOKEN_BYTES, 57);
    }
}
