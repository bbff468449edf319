//! Base64-encoded key material as recognized by config and environment variable overrides.
//!
//! Every buyer key carries an 8-byte buyer id prefix before the raw key bytes, matching the
//! format produced by the backend's key-generation tooling. A public/private pair is only valid
//! if both ids agree.

use crate::crypto::{SIGN_PUBLIC_KEY_SIZE, SIGN_SECRET_KEY_SIZE};
use crate::encoding::base64;

#[derive(Debug, Eq, PartialEq)]
pub struct BuyerPublicKey {
    pub buyer_id: u64,
    pub public_key: [u8; SIGN_PUBLIC_KEY_SIZE],
}

#[derive(Debug, Eq, PartialEq)]
pub struct BuyerPrivateKey {
    pub buyer_id: u64,
    pub secret_key: [u8; SIGN_SECRET_KEY_SIZE],
}

#[derive(Debug, Eq, PartialEq)]
pub enum KeyParseError {
    InvalidBase64,
    WrongLength,
}

impl BuyerPublicKey {
    pub fn parse(encoded: &str) -> Result<Self, KeyParseError> {
        let bytes = base64::decode(encoded).map_err(|_| KeyParseError::InvalidBase64)?;
        if bytes.len() != 8 + SIGN_PUBLIC_KEY_SIZE {
            return Err(KeyParseError::WrongLength);
        }

        let buyer_id = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let mut public_key = [0u8; SIGN_PUBLIC_KEY_SIZE];
        public_key.copy_from_slice(&bytes[8..]);

        Ok(BuyerPublicKey { buyer_id, public_key })
    }
}

impl BuyerPrivateKey {
    pub fn parse(encoded: &str) -> Result<Self, KeyParseError> {
        let bytes = base64::decode(encoded).map_err(|_| KeyParseError::InvalidBase64)?;
        if bytes.len() != 8 + SIGN_SECRET_KEY_SIZE {
            return Err(KeyParseError::WrongLength);
        }

        let buyer_id = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let mut secret_key = [0u8; SIGN_SECRET_KEY_SIZE];
        secret_key.copy_from_slice(&bytes[8..]);

        Ok(BuyerPrivateKey { buyer_id, secret_key })
    }
}

/// A validated buyer keypair: the public and private halves agree on `buyer_id`.
#[derive(Debug, Eq, PartialEq)]
pub struct BuyerKeypair {
    pub buyer_id: u64,
    pub public_key: [u8; SIGN_PUBLIC_KEY_SIZE],
    pub secret_key: [u8; SIGN_SECRET_KEY_SIZE],
}

impl BuyerKeypair {
    pub fn new(public: BuyerPublicKey, private: BuyerPrivateKey) -> Option<Self> {
        if public.buyer_id != private.buyer_id {
            return None;
        }

        Some(BuyerKeypair {
            buyer_id: public.buyer_id,
            public_key: public.public_key,
            secret_key: private.secret_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_public(buyer_id: u64, key: &[u8; SIGN_PUBLIC_KEY_SIZE]) -> String {
        let mut bytes = buyer_id.to_le_bytes().to_vec();
        bytes.extend_from_slice(key);
        ::base64::encode(bytes)
    }

    fn encode_private(buyer_id: u64, key: &[u8; SIGN_SECRET_KEY_SIZE]) -> String {
        let mut bytes = buyer_id.to_le_bytes().to_vec();
        bytes.extend_from_slice(key);
        ::base64::encode(bytes)
    }

    #[test]
    fn matching_ids_produce_a_keypair() {
        let (public_key, secret_key) = crate::crypto::sign_keypair();
        let public = BuyerPublicKey::parse(&encode_public(1234, &public_key)).unwrap();
        let private = BuyerPrivateKey::parse(&encode_private(1234, &secret_key)).unwrap();

        let keypair = BuyerKeypair::new(public, private).unwrap();
        assert_eq!(keypair.buyer_id, 1234);
    }

    #[test]
    fn mismatched_ids_are_rejected() {
        let (public_key, secret_key) = crate::crypto::sign_keypair();
        let public = BuyerPublicKey::parse(&encode_public(1234, &public_key)).unwrap();
        let private = BuyerPrivateKey::parse(&encode_private(5678, &secret_key)).unwrap();

        assert!(BuyerKeypair::new(public, private).is_none());
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert_eq!(
            BuyerPublicKey::parse(&::base64::encode(b"too short")),
            Err(KeyParseError::WrongLength)
        );
    }
}
