//! `UidSource` (§3: "UID message (external, referenced)"). UID creation and
//! signing live in an out-of-scope external layer; the core only ever reads
//! three things out of one: a canonicalized identity string, a signature
//! public key, and a static DH public key.

use emc_proto::identity::require_mapped;

use crate::error::StoreError;

/// A long-term identity binding, already created and signed elsewhere. The
/// core never constructs one — callers hand in whatever their UID layer
/// produced.
pub trait UidSource: Send + Sync {
    fn identity(&self) -> &str;
    fn signature_pub(&self) -> [u8; 32];
    fn dh_pub(&self) -> [u8; 32];
    /// The exact bytes embedded verbatim as `Header.sender_uid` (§4.1).
    fn to_wire_json(&self) -> String;
}

/// The minimal shape the core expects to recover from `Header.sender_uid`
/// on receipt (§4.4 receive step 2: "asynchronously parse and validate the
/// embedded sender UID"). The full external UID-message format is out of
/// scope; this is the subset the core actually consumes.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParsedUid {
    pub identity: String,
    #[serde(with = "hex_32")]
    pub signature_pub: [u8; 32],
    #[serde(with = "hex_32")]
    pub dh_pub: [u8; 32],
}

mod hex_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let raw = hex::decode(&s).map_err(serde::de::Error::custom)?;
        raw.try_into().map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

impl ParsedUid {
    pub fn from_wire_json(json: &str) -> Result<Self, StoreError> {
        let parsed: ParsedUid = serde_json::from_str(json)?;
        require_mapped(&parsed.identity).map_err(|e| StoreError::InvalidIdentity(e.to_string()))?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestUid {
        identity: String,
        signature_pub: [u8; 32],
        dh_pub: [u8; 32],
    }

    impl UidSource for TestUid {
        fn identity(&self) -> &str {
            &self.identity
        }
        fn signature_pub(&self) -> [u8; 32] {
            self.signature_pub
        }
        fn dh_pub(&self) -> [u8; 32] {
            self.dh_pub
        }
        fn to_wire_json(&self) -> String {
            serde_json::to_string(&ParsedUid {
                identity: self.identity.clone(),
                signature_pub: self.signature_pub,
                dh_pub: self.dh_pub,
            })
            .unwrap()
        }
    }

    #[test]
    fn wire_json_roundtrips() {
        let uid = TestUid { identity: "alice@example.com".into(), signature_pub: [1u8; 32], dh_pub: [2u8; 32] };
        let parsed = ParsedUid::from_wire_json(&uid.to_wire_json()).unwrap();
        assert_eq!(parsed.identity, "alice@example.com");
        assert_eq!(parsed.signature_pub, [1u8; 32]);
        assert_eq!(parsed.dh_pub, [2u8; 32]);
    }

    #[test]
    fn rejects_unmapped_identity() {
        let uid = TestUid { identity: "Alice@example.com".into(), signature_pub: [1u8; 32], dh_pub: [2u8; 32] };
        assert!(ParsedUid::from_wire_json(&uid.to_wire_json()).is_err());
    }
}
