use cairn_types::Cid;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::hasher::ContentHasher;

/// Per-database symmetric key (256 bits).
///
/// Generated once when a database is created and persisted as hex in the
/// database's meta record.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial([u8; 32]);

impl KeyMaterial {
    /// Generate a fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Stable, non-secret identifier for this key.
    pub fn fingerprint(&self) -> Cid {
        ContentHasher::KEY_ID.hash(&self.0)
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyMaterial(<redacted> id={})", self.fingerprint().short_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        assert_ne!(KeyMaterial::generate(), KeyMaterial::generate());
    }

    #[test]
    fn hex_roundtrip() {
        let key = KeyMaterial::generate();
        assert_eq!(KeyMaterial::from_hex(&key.to_hex()).unwrap(), key);
    }

    #[test]
    fn from_hex_rejects_short_key() {
        assert!(matches!(
            KeyMaterial::from_hex("abcd"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn debug_is_redacted() {
        let key = KeyMaterial::from_bytes([7; 32]);
        let debug = format!("{key:?}");
        assert!(!debug.contains(&key.to_hex()));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn fingerprint_is_stable() {
        let key = KeyMaterial::from_bytes([1; 32]);
        assert_eq!(key.fingerprint(), KeyMaterial::from_bytes([1; 32]).fingerprint());
        assert_ne!(key.fingerprint(), KeyMaterial::from_bytes([2; 32]).fingerprint());
    }
}
