use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512};

use crate::{DriveError, DriveResult};

pub const IDENTITY_LEN: usize = 64;

/// Opaque 512-bit identity. Names a directory, a stored blob (by content
/// hash), or a chunk. Encoded as lowercase hex on the wire and in stores.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity([u8; IDENTITY_LEN]);

/// Identity of a directory.
pub type DirectoryId = Identity;

/// Directory id of a directory's parent. The root directory's parent id is
/// the drive-wide unique user id.
pub type ParentId = Identity;

impl Identity {
    pub fn from_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
        Self(bytes)
    }

    /// A fresh random identity, used when a new directory is created.
    pub fn random() -> Self {
        let mut bytes = [0u8; IDENTITY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// SHA-512 of `data`; the content hash used for version names.
    pub fn hash_of(data: &[u8]) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut bytes = [0u8; IDENTITY_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> DriveResult<Self> {
        let raw = hex::decode(s)
            .map_err(|e| DriveError::InvalidParameter(format!("bad identity hex: {}", e)))?;
        if raw.len() != IDENTITY_LEN {
            return Err(DriveError::InvalidParameter(format!(
                "identity must be {} bytes, got {}",
                IDENTITY_LEN,
                raw.len()
            )));
        }
        let mut bytes = [0u8; IDENTITY_LEN];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full hex is unreadable in logs; the first 8 bytes identify well enough.
        write!(f, "Identity({}..)", hex::encode(&self.0[..8]))
    }
}

impl Serialize for Identity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Identity::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let id = Identity::random();
        let hex_str = id.to_hex();
        assert_eq!(hex_str.len(), IDENTITY_LEN * 2);
        let parsed = Identity::from_hex(&hex_str).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(Identity::from_hex("abcd").is_err());
        assert!(Identity::from_hex("not hex at all").is_err());
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = Identity::hash_of(b"directory bytes");
        let b = Identity::hash_of(b"directory bytes");
        let c = Identity::hash_of(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = Identity::hash_of(b"x");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
