//! 32-bit FNV-1a, shared by the dupe and history caches.

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Hash `bytes`, continuing from `seed`. A zero seed starts a fresh hash.
///
/// Chaining (`keyhash(b, keyhash(a, 0))`) is order dependent, which is what
/// the dupe cache wants for its (address, payload) key.
pub fn keyhash(bytes: &[u8], seed: u32) -> u32 {
    let mut hash = if seed == 0 { FNV_OFFSET_BASIS } else { seed };
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Same as [`keyhash`] but folds ASCII to upper case first.
pub fn keyhash_uppercase(bytes: &[u8], seed: u32) -> u32 {
    let mut hash = if seed == 0 { FNV_OFFSET_BASIS } else { seed };
    for &b in bytes {
        hash ^= u32::from(b.to_ascii_uppercase());
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Fold a 32-bit hash down to a bucket index of a `buckets`-sized table.
pub fn fold_to_bucket(hash: u32, buckets: usize) -> usize {
    debug_assert!(buckets > 0);
    let mut idx = hash ^ (hash >> 16);
    idx ^= idx >> 8;
    idx as usize % buckets
}
