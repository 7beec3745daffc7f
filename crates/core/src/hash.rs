//! Content hashing used for cache keys and re-ingestion detection.

use sha2::{Digest, Sha256};

/// Hex encoded SHA-256 of `content`.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// First four bytes of the SHA-256 digest as an integer.
///
/// Stable across processes and platforms, unlike `std`'s hasher.
pub fn stable_u32(content: &str) -> u32 {
    let digest = Sha256::digest(content.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_deterministic() {
        let a = content_hash("최종지급액: 1,250,000원");
        let b = content_hash("최종지급액: 1,250,000원");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash("최종지급액: 1,250,001원"));
    }

    #[test]
    fn test_content_hash_known_value() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_stable_u32() {
        assert_eq!(stable_u32("commission"), stable_u32("commission"));
        assert_eq!(stable_u32("abc"), 0xba78_16bf);
    }
}
