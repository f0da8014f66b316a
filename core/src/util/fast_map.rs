//! Fx-hashed maps for the hot variable-lookup and primitive-dispatch paths.
//! Keys are interned selector and variable names, never attacker-controlled.

pub type FastHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

#[inline]
pub fn fast_hash_map_new<K, V>() -> FastHashMap<K, V> {
    rustc_hash::FxHashMap::default()
}
