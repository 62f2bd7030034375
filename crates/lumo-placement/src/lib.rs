//! Content addressing and shard placement.
//!
//! This module implements:
//! - SHA-256 content hashing for the stable `photo_id`
//! - xxhash64 with seed=0 over the `photo_id`, reduced mod member count,
//!   for deterministic shard placement
//!
//! Placement is a pure function of the photo id and the member count at
//! upload time; membership changes are never retroactively applied.

use sha2::{Digest, Sha256};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Compute the content-addressed photo id: lowercase hex SHA-256 of the
/// raw photo bytes.
///
/// # Examples
///
/// ```
/// use lumo_placement::photo_id_for_bytes;
///
/// let id = photo_id_for_bytes(b"pixels");
/// assert_eq!(id.len(), 64);
/// assert_eq!(id, photo_id_for_bytes(b"pixels")); // Deterministic
/// ```
pub fn photo_id_for_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Compute xxhash64 of a key with seed=0.
pub fn xxhash64(key: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key);
    hasher.finish()
}

/// Map a photo id to a shard index given the current member count.
///
/// Uniform and deterministic, independent of the insertion order of other
/// photos.
///
/// # Panics
///
/// Panics if `member_count` is 0; callers must refuse uploads before any
/// shard has registered.
pub fn shard_for_photo(photo_id: &str, member_count: u32) -> u32 {
    assert!(member_count > 0, "placement requires at least one member");
    (xxhash64(photo_id.as_bytes()) % member_count as u64) as u32
}
