use byteorder::{LittleEndian, WriteBytesExt};
use ctor::ctor;
use libsodium_sys;

pub const MAC_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_ABYTES as usize;
pub const KEY_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_KEYBYTES as usize;
pub const NONCE_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_NPUBBYTES as usize;

pub const XCHACHA_MAC_SIZE: usize = libsodium_sys::crypto_aead_xchacha20poly1305_ietf_ABYTES as usize;
pub const XCHACHA_KEY_SIZE: usize = libsodium_sys::crypto_aead_xchacha20poly1305_ietf_KEYBYTES as usize;
pub const XCHACHA_NONCE_SIZE: usize = libsodium_sys::crypto_aead_xchacha20poly1305_ietf_NPUBBYTES as usize;

pub const SIGN_PUBLIC_KEY_SIZE: usize = libsodium_sys::crypto_sign_ed25519_PUBLICKEYBYTES as usize;
pub const SIGN_SECRET_KEY_SIZE: usize = libsodium_sys::crypto_sign_ed25519_SECRETKEYBYTES as usize;
pub const SIGNATURE_SIZE: usize = libsodium_sys::crypto_sign_ed25519_BYTES as usize;

pub const KX_PUBLIC_KEY_SIZE: usize = libsodium_sys::crypto_scalarmult_curve25519_BYTES as usize;
pub const KX_SECRET_KEY_SIZE: usize = libsodium_sys::crypto_scalarmult_curve25519_BYTES as usize;

const NONCE_OFFSET: usize = NONCE_SIZE - 8;

/// Initializes the sodium infrastructure exactly once per process.
#[ctor]
fn init_sodium() {
    unsafe {
        if libsodium_sys::sodium_init() < 0 {
            panic!("cryptography initialization failed")
        }
    }
}

#[inline]
fn nonce_to_bytes(nonce: u64) -> [u8; NONCE_SIZE] {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    (&mut nonce_bytes[NONCE_OFFSET..])
        .write_u64::<LittleEndian>(nonce)
        .expect("error creating nonce");
    nonce_bytes
}

/// Encrypts `plain` into `cipher` using ChaCha20-Poly1305-IETF. `cipher` must be exactly
/// `plain.len() + MAC_SIZE` bytes.
#[inline]
pub fn encrypt(
    cipher: &mut [u8],
    plain: &[u8],
    additional_data: &[u8],
    nonce: u64,
    key: &[u8; KEY_SIZE],
) -> bool {
    let nonce_bytes = nonce_to_bytes(nonce);

    if cipher.len() != plain.len() + MAC_SIZE {
        panic!(
            "encryption: cipher data length ({}) must be plain data length ({}) + MAC size ({})",
            cipher.len(),
            plain.len(),
            MAC_SIZE
        )
    }

    unsafe {
        let result = libsodium_sys::crypto_aead_chacha20poly1305_ietf_encrypt(
            cipher.as_mut_ptr(),
            ::std::ptr::null_mut(),
            plain.as_ptr(),
            plain.len() as u64,
            additional_data.as_ptr(),
            additional_data.len() as u64,
            ::std::ptr::null(),
            nonce_bytes.as_ptr(),
            key.as_ptr(),
        );

        result >= 0
    }
}

/// Decrypts `cipher` into `plain` using ChaCha20-Poly1305-IETF. `cipher` must be exactly
/// `plain.len() + MAC_SIZE` bytes. Returns `false` on any tag mismatch.
#[inline]
pub fn decrypt(
    plain: &mut [u8],
    cipher: &[u8],
    additional_data: &[u8],
    nonce: u64,
    key: &[u8; KEY_SIZE],
) -> bool {
    let nonce_bytes = nonce_to_bytes(nonce);

    if cipher.len() != plain.len() + MAC_SIZE {
        panic!(
            "decryption: cipher data length ({}) must be plain data length ({}) + MAC size ({})",
            cipher.len(),
            plain.len(),
            MAC_SIZE
        )
    }

    unsafe {
        let result = libsodium_sys::crypto_aead_chacha20poly1305_ietf_decrypt(
            plain.as_mut_ptr(),
            ::std::ptr::null_mut(),
            ::std::ptr::null_mut(),
            cipher.as_ptr(),
            cipher.len() as u64,
            additional_data.as_ptr(),
            additional_data.len() as u64,
            nonce_bytes.as_ptr(),
            key.as_ptr(),
        );

        result >= 0
    }
}

/// Same as [`encrypt`], but takes the full 12-byte nonce verbatim instead of deriving it from a
/// `u64`. Used where the wire format packs something other than a plain sequence number into the
/// nonce (the routed-payload header packs `type_as_u32_le ‖ sequence_u64_le`).
#[inline]
pub fn encrypt_with_nonce_bytes(
    cipher: &mut [u8],
    plain: &[u8],
    additional_data: &[u8],
    nonce_bytes: &[u8; NONCE_SIZE],
    key: &[u8; KEY_SIZE],
) -> bool {
    if cipher.len() != plain.len() + MAC_SIZE {
        panic!(
            "encryption: cipher data length ({}) must be plain data length ({}) + MAC size ({})",
            cipher.len(),
            plain.len(),
            MAC_SIZE
        )
    }

    unsafe {
        let result = libsodium_sys::crypto_aead_chacha20poly1305_ietf_encrypt(
            cipher.as_mut_ptr(),
            ::std::ptr::null_mut(),
            plain.as_ptr(),
            plain.len() as u64,
            additional_data.as_ptr(),
            additional_data.len() as u64,
            ::std::ptr::null(),
            nonce_bytes.as_ptr(),
            key.as_ptr(),
        );

        result >= 0
    }
}

/// Counterpart to [`encrypt_with_nonce_bytes`].
#[inline]
pub fn decrypt_with_nonce_bytes(
    plain: &mut [u8],
    cipher: &[u8],
    additional_data: &[u8],
    nonce_bytes: &[u8; NONCE_SIZE],
    key: &[u8; KEY_SIZE],
) -> bool {
    if cipher.len() != plain.len() + MAC_SIZE {
        panic!(
            "decryption: cipher data length ({}) must be plain data length ({}) + MAC size ({})",
            cipher.len(),
            plain.len(),
            MAC_SIZE
        )
    }

    unsafe {
        let result = libsodium_sys::crypto_aead_chacha20poly1305_ietf_decrypt(
            plain.as_mut_ptr(),
            ::std::ptr::null_mut(),
            ::std::ptr::null_mut(),
            cipher.as_ptr(),
            cipher.len() as u64,
            additional_data.as_ptr(),
            additional_data.len() as u64,
            nonce_bytes.as_ptr(),
            key.as_ptr(),
        );

        result >= 0
    }
}

/// Encrypts `plain` into `cipher` using XChaCha20-Poly1305-IETF with a random 24-byte nonce
/// prepended to `cipher`. `cipher` must be exactly `XCHACHA_NONCE_SIZE + plain.len() +
/// XCHACHA_MAC_SIZE` bytes; used for route/continue tokens, which carry no sequence to derive a
/// nonce from.
#[inline]
pub fn xchacha_encrypt(cipher: &mut [u8], plain: &[u8], key: &[u8; XCHACHA_KEY_SIZE]) -> bool {
    if cipher.len() != XCHACHA_NONCE_SIZE + plain.len() + XCHACHA_MAC_SIZE {
        panic!("xchacha encryption: destination buffer has the wrong size");
    }

    let (nonce_slot, rest) = cipher.split_at_mut(XCHACHA_NONCE_SIZE);
    random_bytes(nonce_slot);

    unsafe {
        let result = libsodium_sys::crypto_aead_xchacha20poly1305_ietf_encrypt(
            rest.as_mut_ptr(),
            ::std::ptr::null_mut(),
            plain.as_ptr(),
            plain.len() as u64,
            ::std::ptr::null(),
            0,
            ::std::ptr::null(),
            nonce_slot.as_ptr(),
            key.as_ptr(),
        );

        result >= 0
    }
}

/// Decrypts an XChaCha20-Poly1305-IETF blob produced by [`xchacha_encrypt`]: the first
/// `XCHACHA_NONCE_SIZE` bytes of `cipher` are the nonce.
#[inline]
pub fn xchacha_decrypt(plain: &mut [u8], cipher: &[u8], key: &[u8; XCHACHA_KEY_SIZE]) -> bool {
    if cipher.len() < XCHACHA_NONCE_SIZE + XCHACHA_MAC_SIZE
        || plain.len() != cipher.len() - XCHACHA_NONCE_SIZE - XCHACHA_MAC_SIZE
    {
        return false;
    }

    let (nonce_slot, rest) = cipher.split_at(XCHACHA_NONCE_SIZE);

    unsafe {
        let result = libsodium_sys::crypto_aead_xchacha20poly1305_ietf_decrypt(
            plain.as_mut_ptr(),
            ::std::ptr::null_mut(),
            ::std::ptr::null_mut(),
            rest.as_ptr(),
            rest.len() as u64,
            ::std::ptr::null(),
            0,
            nonce_slot.as_ptr(),
            key.as_ptr(),
        );

        result >= 0
    }
}

/// Generates a fresh Ed25519 signing keypair.
#[inline]
pub fn sign_keypair() -> ([u8; SIGN_PUBLIC_KEY_SIZE], [u8; SIGN_SECRET_KEY_SIZE]) {
    let mut public_key = [0u8; SIGN_PUBLIC_KEY_SIZE];
    let mut secret_key = [0u8; SIGN_SECRET_KEY_SIZE];

    unsafe {
        libsodium_sys::crypto_sign_ed25519_keypair(public_key.as_mut_ptr(), secret_key.as_mut_ptr());
    }

    (public_key, secret_key)
}

/// Produces a detached Ed25519 signature over `message`.
#[inline]
pub fn sign_detached(message: &[u8], secret_key: &[u8; SIGN_SECRET_KEY_SIZE]) -> [u8; SIGNATURE_SIZE] {
    let mut signature = [0u8; SIGNATURE_SIZE];

    unsafe {
        libsodium_sys::crypto_sign_ed25519_detached(
            signature.as_mut_ptr(),
            ::std::ptr::null_mut(),
            message.as_ptr(),
            message.len() as u64,
            secret_key.as_ptr(),
        );
    }

    signature
}

/// Verifies a detached Ed25519 signature over `message`.
#[inline]
pub fn sign_verify_detached(
    signature: &[u8; SIGNATURE_SIZE],
    message: &[u8],
    public_key: &[u8; SIGN_PUBLIC_KEY_SIZE],
) -> bool {
    unsafe {
        libsodium_sys::crypto_sign_ed25519_verify_detached(
            signature.as_ptr(),
            message.as_ptr(),
            message.len() as u64,
            public_key.as_ptr(),
        ) == 0
    }
}

/// Generates a fresh X25519 key-exchange keypair.
#[inline]
pub fn kx_keypair() -> ([u8; KX_PUBLIC_KEY_SIZE], [u8; KX_SECRET_KEY_SIZE]) {
    let mut secret_key = [0u8; KX_SECRET_KEY_SIZE];
    random_bytes(&mut secret_key);

    let mut public_key = [0u8; KX_PUBLIC_KEY_SIZE];
    unsafe {
        libsodium_sys::crypto_scalarmult_curve25519_base(public_key.as_mut_ptr(), secret_key.as_ptr());
    }

    (public_key, secret_key)
}

/// Derives the shared AEAD key for an upgrade handshake: `X25519(our_secret, their_public)`
/// hashed with BLAKE2b down to an AEAD-sized key, matching the upgrade protocol's
/// "derive shared key via X25519" contract.
#[inline]
pub fn kx_shared_key(
    our_secret: &[u8; KX_SECRET_KEY_SIZE],
    their_public: &[u8; KX_PUBLIC_KEY_SIZE],
) -> Option<[u8; KEY_SIZE]> {
    let mut shared = [0u8; KX_PUBLIC_KEY_SIZE];

    let result = unsafe {
        libsodium_sys::crypto_scalarmult_curve25519(
            shared.as_mut_ptr(),
            our_secret.as_ptr(),
            their_public.as_ptr(),
        )
    };

    if result != 0 {
        return None;
    }

    let mut key = [0u8; KEY_SIZE];
    unsafe {
        libsodium_sys::crypto_generichash(
            key.as_mut_ptr(),
            key.len(),
            shared.as_ptr(),
            shared.len() as u64,
            ::std::ptr::null(),
            0,
        );
    }

    Some(key)
}

/// Fills the provided buffer with cryptographically secure random bytes.
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    unsafe {
        libsodium_sys::randombytes_buf(out.as_mut_ptr() as *mut ::std::ffi::c_void, out.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chacha_round_trip() {
        let key = [7u8; KEY_SIZE];
        let plain = b"client to server payload";
        let mut cipher = vec![0u8; plain.len() + MAC_SIZE];
        assert!(encrypt(&mut cipher, plain, b"aad", 42, &key));

        let mut decoded = vec![0u8; plain.len()];
        assert!(decrypt(&mut decoded, &cipher, b"aad", 42, &key));
        assert_eq!(&decoded[..], &plain[..]);
    }

    #[test]
    fn chacha_rejects_wrong_key() {
        let key = [7u8; KEY_SIZE];
        let other = [9u8; KEY_SIZE];
        let plain = b"payload";
        let mut cipher = vec![0u8; plain.len() + MAC_SIZE];
        assert!(encrypt(&mut cipher, plain, b"aad", 1, &key));

        let mut decoded = vec![0u8; plain.len()];
        assert!(!decrypt(&mut decoded, &cipher, b"aad", 1, &other));
    }

    #[test]
    fn nonce_bytes_round_trip() {
        let key = [7u8; KEY_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[0..4].copy_from_slice(&3u32.to_le_bytes());
        nonce[4..12].copy_from_slice(&42u64.to_le_bytes());

        let plain = b"routed payload";
        let mut cipher = vec![0u8; plain.len() + MAC_SIZE];
        assert!(encrypt_with_nonce_bytes(&mut cipher, plain, b"aad", &nonce, &key));

        let mut decoded = vec![0u8; plain.len()];
        assert!(decrypt_with_nonce_bytes(&mut decoded, &cipher, b"aad", &nonce, &key));
        assert_eq!(&decoded[..], &plain[..]);
    }

    #[test]
    fn xchacha_round_trip() {
        let key = [3u8; XCHACHA_KEY_SIZE];
        let plain = b"111-byte route token plaintext goes here";
        let mut cipher = vec![0u8; XCHACHA_NONCE_SIZE + plain.len() + XCHACHA_MAC_SIZE];
        assert!(xchacha_encrypt(&mut cipher, plain, &key));

        let mut decoded = vec![0u8; plain.len()];
        assert!(xchacha_decrypt(&mut decoded, &cipher, &key));
        assert_eq!(&decoded[..], &plain[..]);
    }

    #[test]
    fn sign_round_trip() {
        let (public_key, secret_key) = sign_keypair();
        let message = b"upgrade request";
        let signature = sign_detached(message, &secret_key);
        assert!(sign_verify_detached(&signature, message, &public_key));

        let (other_public, _) = sign_keypair();
        assert!(!sign_verify_detached(&signature, message, &other_public));
    }

    #[test]
    fn kx_shared_key_matches_both_sides() {
        let (client_public, client_secret) = kx_keypair();
        let (server_public, server_secret) = kx_keypair();

        let client_key = kx_shared_key(&client_secret, &server_public).unwrap();
        let server_key = kx_shared_key(&server_secret, &client_public).unwrap();

        assert_eq!(client_key, server_key);
    }
}
