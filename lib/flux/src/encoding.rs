/// Base64 (de)serialization helpers for fixed-size key material, following the same
/// `serialize_with`/`deserialize_with` pattern used for every base64-encoded key in this crate.
pub mod base64 {
    use serde::Serializer;

    #[inline]
    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&::base64::encode(bytes))
    }

    #[inline]
    pub fn decode(s: &str) -> Result<Vec<u8>, ::base64::DecodeError> {
        ::base64::decode(s)
    }
}
