use fnv::FnvHasher;
use std::hash::Hasher;

/// FNV-1a 64 bit hash of a byte slice, using the standard FNV offset basis and prime.
#[inline]
pub fn fnv1a64(data: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(data);
    hasher.finish()
}
