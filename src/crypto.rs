// =============================================================================
// Signing primitives shared by the venue adapters
// =============================================================================

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// HMAC-SHA256 hex signature of `payload`.
pub fn hmac_sha256_hex(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// HMAC-SHA512 hex signature of `payload`.
pub fn hmac_sha512_hex(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// SHA-512 hex digest of `data` (request-body hashing).
pub fn sha512_hex(data: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of `data`.
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    // Known vectors from the HMAC reference material.
    const MSG: &str = "The quick brown fox jumps over the lazy dog";

    #[test]
    fn hmac_sha256_known_vector() {
        assert_eq!(
            hmac_sha256_hex("key", MSG),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn hmac_sha512_known_vector() {
        assert_eq!(
            hmac_sha512_hex("key", MSG),
            "b42af09057bac1e2d41708e48a902e09b5ff7f12ab428a4fe86653c73dd248fb\
             82f948a549f7b791a5b41915ee4d1ec3935357e4e2317250d0372afa2ebeeb3a"
        );
    }

    #[test]
    fn sha512_of_empty_body() {
        // Venue B signs an empty body as SHA512("").
        assert_eq!(
            sha512_hex(""),
            "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce\
             47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e"
        );
    }

    #[test]
    fn signatures_are_input_sensitive() {
        assert_ne!(hmac_sha256_hex("key", "a"), hmac_sha256_hex("key", "b"));
        assert_ne!(hmac_sha256_hex("k1", "a"), hmac_sha256_hex("k2", "a"));
    }
}
