//! `#[serde(with = "...")]` helper for 64-byte hash/signature fields.
//!
//! serde's built-in array support only covers lengths 0..=32 (there is no
//! const-generic impl), so every `[u8; 64]` field embedded in a
//! `Serialize`/`Deserialize` struct needs this, the same way `emc_store`'s
//! `ParsedUid` hex-encodes its 32-byte fields.

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
    let s = String::deserialize(d)?;
    let raw = hex::decode(&s).map_err(serde::de::Error::custom)?;
    raw.try_into().map_err(|_| serde::de::Error::custom("expected 64 bytes"))
}
