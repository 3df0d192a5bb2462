use cairn_types::Cid;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash, so
/// digests computed for different purposes never collide with each other or
/// with plain block ids.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for key fingerprints (key ids).
    pub const KEY_ID: Self = Self {
        domain: "cairn-key-v1",
    };

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Cid {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Cid::from_hash(*hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(
            ContentHasher::KEY_ID.hash(b"hello"),
            ContentHasher::KEY_ID.hash(b"hello")
        );
    }

    #[test]
    fn domain_separates_from_plain_cid() {
        let data = b"same content";
        assert_ne!(ContentHasher::KEY_ID.hash(data), Cid::from_bytes(data));
        assert_ne!(ContentHasher::KEY_ID.hash(data), ContentHasher::KEY_ID.hash(b"other content"));
    }
}
