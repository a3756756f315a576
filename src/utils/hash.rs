use blake3::Hasher;

/// Hash of a dotted path string; the first 8 bytes of its BLAKE3 digest.
pub fn path_hash(dotted: &str) -> u64 {
    let digest = blake3::hash(dotted.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(buf)
}

/// Stable hash of a symbol identity (`name:version:path`)
pub fn symbol_hash(dist_name: &str, dist_version: &str, path: &str) -> u64 {
    let mut hasher = Hasher::new();
    hasher.update(dist_name.as_bytes());
    hasher.update(b":");
    hasher.update(dist_version.as_bytes());
    hasher.update(b":");
    hasher.update(path.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
    u64::from_be_bytes(buf)
}

/// Hex digest used to name on-disk copies of remote resources
pub fn uri_digest(uri: &str) -> String {
    blake3::hash(uri.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_hash_is_stable_and_discriminating() {
        assert_eq!(path_hash("json.dumps"), path_hash("json.dumps"));
        assert_ne!(path_hash("json.dumps"), path_hash("json.loads"));
    }

    #[test]
    fn symbol_hash_separates_fields() {
        assert_ne!(symbol_hash("a", "bc", "d"), symbol_hash("ab", "c", "d"));
    }

    #[test]
    fn uri_digest_is_hex() {
        let digest = uri_digest("https://example.com/manifest.json");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
