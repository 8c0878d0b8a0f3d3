use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Hashes a string with a fixed, platform-independent hasher. Used to derive per-generator seeds
/// from a base seed, so the result must never depend on process state.
pub(crate) fn hash_str(value: &str) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}
