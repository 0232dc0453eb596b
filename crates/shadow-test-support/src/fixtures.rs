//! Descriptor fixtures.

/// Deterministic 40 character hex info hash derived from `seed`.
#[must_use]
pub fn sample_hash(seed: u8) -> String {
    format!("{seed:02x}").repeat(20)
}

/// Magnet URI for `hash` advertising `name` as its display name.
#[must_use]
pub fn magnet_uri(hash: &str, name: &str) -> String {
    format!("magnet:?xt=urn:btih:{hash}&dn={name}")
}
