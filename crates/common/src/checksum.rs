//! Checksum calculation and verification.
//!
//! Two checksum flavors share the same digest primitives:
//!
//! - **Callback checksum**: appended to outbound webhook calls as a
//!   `checksum` query parameter, computed over
//!   `callbackURL + JSON(body) + sharedSecret`.
//! - **API checksum**: guards the hook administration API, computed over
//!   `methodName + queryStringWithoutChecksum + sharedSecret`.
//!
//! The sender picks one algorithm; the verifier recovers it from the digest
//! hex length (40 ⇒ SHA-1, 64 ⇒ SHA-256, 96 ⇒ SHA-384, 128 ⇒ SHA-512), so
//! any supported algorithm is accepted on the inbound path.

use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

/// Supported checksum digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

/// All supported algorithms, in ascending digest-length order.
pub const SUPPORTED_ALGORITHMS: [ChecksumAlgorithm; 4] = [
    ChecksumAlgorithm::Sha1,
    ChecksumAlgorithm::Sha256,
    ChecksumAlgorithm::Sha384,
    ChecksumAlgorithm::Sha512,
];

impl ChecksumAlgorithm {
    /// Length of this algorithm's digest in hex characters.
    #[must_use]
    pub const fn digest_hex_len(self) -> usize {
        match self {
            ChecksumAlgorithm::Sha1 => 40,
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Sha384 => 96,
            ChecksumAlgorithm::Sha512 => 128,
        }
    }

    /// Recover the algorithm from a digest's hex length.
    ///
    /// Returns `None` for lengths that match no supported algorithm.
    #[must_use]
    pub const fn from_digest_hex_len(len: usize) -> Option<Self> {
        match len {
            40 => Some(ChecksumAlgorithm::Sha1),
            64 => Some(ChecksumAlgorithm::Sha256),
            96 => Some(ChecksumAlgorithm::Sha384),
            128 => Some(ChecksumAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Hex-encoded digest of `input` under this algorithm.
    #[must_use]
    pub fn digest(self, input: &str) -> String {
        match self {
            ChecksumAlgorithm::Sha1 => hex::encode(Sha1::digest(input.as_bytes())),
            ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
            ChecksumAlgorithm::Sha384 => hex::encode(Sha384::digest(input.as_bytes())),
            ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(input.as_bytes())),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha384 => "sha384",
            ChecksumAlgorithm::Sha512 => "sha512",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(ChecksumAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(ChecksumAlgorithm::Sha256),
            "sha384" | "sha-384" => Ok(ChecksumAlgorithm::Sha384),
            "sha512" | "sha-512" => Ok(ChecksumAlgorithm::Sha512),
            other => Err(format!("unsupported checksum algorithm: {other}")),
        }
    }
}

/// Checksum for an outbound callback: `hash(callbackURL + body + secret)`.
///
/// `body` is the JSON rendering of the POST fields (the wire body itself is
/// form-encoded, but the digest covers the JSON form).
#[must_use]
pub fn callback_checksum(
    algorithm: ChecksumAlgorithm,
    callback_url: &str,
    body: &str,
    secret: &str,
) -> String {
    algorithm.digest(&format!("{callback_url}{body}{secret}"))
}

/// Verify an inbound callback checksum, recovering the algorithm from the
/// digest length.
#[must_use]
pub fn verify_callback_checksum(
    callback_url: &str,
    body: &str,
    secret: &str,
    provided: &str,
) -> bool {
    match ChecksumAlgorithm::from_digest_hex_len(provided.len()) {
        Some(algorithm) => {
            callback_checksum(algorithm, callback_url, body, secret) == provided.to_lowercase()
        }
        None => false,
    }
}

/// Checksum for an administration API call:
/// `hash(methodName + queryWithoutChecksum + secret)`.
///
/// `query` must already have the `checksum` parameter removed (see
/// [`strip_checksum_param`]) and must otherwise be the raw query string
/// exactly as the client sent it, since re-encoding would change the digest.
#[must_use]
pub fn api_checksum(
    algorithm: ChecksumAlgorithm,
    method: &str,
    query: &str,
    secret: &str,
) -> String {
    algorithm.digest(&format!("{method}{query}{secret}"))
}

/// Verify an inbound administration API checksum.
///
/// `raw_query` is the request's query string as received (it may still
/// contain the `checksum` parameter, which is stripped before hashing).
#[must_use]
pub fn verify_api_checksum(method: &str, raw_query: &str, secret: &str, provided: &str) -> bool {
    let query = strip_checksum_param(raw_query);
    match ChecksumAlgorithm::from_digest_hex_len(provided.len()) {
        Some(algorithm) => api_checksum(algorithm, method, &query, secret) == provided.to_lowercase(),
        None => false,
    }
}

/// Remove the `checksum` parameter from a raw query string, preserving the
/// rest of the string byte-for-byte.
#[must_use]
pub fn strip_checksum_param(raw_query: &str) -> String {
    raw_query
        .split('&')
        .filter(|param| !param.starts_with("checksum=") && *param != "checksum")
        .collect::<Vec<_>>()
        .join("&")
}

/// Extract the `checksum` parameter's value from a raw query string.
///
/// Digests are hex, so no percent-decoding is needed.
#[must_use]
pub fn checksum_param(raw_query: &str) -> Option<&str> {
    raw_query
        .split('&')
        .find_map(|param| param.strip_prefix("checksum="))
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_hex_lengths() {
        for algorithm in SUPPORTED_ALGORITHMS {
            let digest = algorithm.digest("input");
            assert_eq!(digest.len(), algorithm.digest_hex_len());
            assert_eq!(
                ChecksumAlgorithm::from_digest_hex_len(digest.len()),
                Some(algorithm)
            );
        }
    }

    #[test]
    fn test_from_digest_hex_len_unknown() {
        assert_eq!(ChecksumAlgorithm::from_digest_hex_len(0), None);
        assert_eq!(ChecksumAlgorithm::from_digest_hex_len(41), None);
        assert_eq!(ChecksumAlgorithm::from_digest_hex_len(127), None);
    }

    #[test]
    fn test_sha1_known_vector() {
        // sha1("abc") is a standard test vector
        assert_eq!(
            ChecksumAlgorithm::Sha1.digest("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_parse_algorithm_names() {
        assert_eq!(
            "sha1".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Sha1
        );
        assert_eq!(
            "SHA-256".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Sha256
        );
        assert_eq!(
            "sha384".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Sha384
        );
        assert_eq!(
            "sha512".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Sha512
        );
        assert!("md5".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_callback_checksum_round_trip_all_algorithms() {
        let url = "https://example.com/callback";
        let body = r#"{"event":"[]","timestamp":1700000000000}"#;
        let secret = "shared-secret";

        for algorithm in SUPPORTED_ALGORITHMS {
            let digest = callback_checksum(algorithm, url, body, secret);
            assert!(
                verify_callback_checksum(url, body, secret, &digest),
                "round trip failed for {algorithm}"
            );
        }
    }

    #[test]
    fn test_callback_checksum_rejects_wrong_secret() {
        let url = "https://example.com/callback";
        let body = "payload";
        let digest = callback_checksum(ChecksumAlgorithm::Sha1, url, body, "secret-a");

        assert!(!verify_callback_checksum(url, body, "secret-b", &digest));
    }

    #[test]
    fn test_api_checksum_round_trip_all_algorithms() {
        let method = "create";
        let query = "callbackURL=https%3A%2F%2Fexample.com&meetingID=demo";
        let secret = "shared-secret";

        for algorithm in SUPPORTED_ALGORITHMS {
            let digest = api_checksum(algorithm, method, query, secret);
            let raw_query = format!("{query}&checksum={digest}");
            assert!(
                verify_api_checksum(method, &raw_query, secret, &digest),
                "round trip failed for {algorithm}"
            );
        }
    }

    #[test]
    fn test_api_checksum_invalidated_by_query_mutation() {
        let method = "create";
        let query = "callbackURL=https%3A%2F%2Fexample.com&meetingID=demo";
        let secret = "shared-secret";
        let digest = api_checksum(ChecksumAlgorithm::Sha256, method, query, secret);

        let tampered = "callbackURL=https%3A%2F%2Fevil.com&meetingID=demo";
        let raw_query = format!("{tampered}&checksum={digest}");
        assert!(!verify_api_checksum(method, &raw_query, secret, &digest));
    }

    #[test]
    fn test_api_checksum_rejects_unknown_digest_length() {
        assert!(!verify_api_checksum("create", "a=1", "secret", "abc123"));
    }

    #[test]
    fn test_strip_checksum_param_positions() {
        assert_eq!(strip_checksum_param("checksum=abc&a=1&b=2"), "a=1&b=2");
        assert_eq!(strip_checksum_param("a=1&checksum=abc&b=2"), "a=1&b=2");
        assert_eq!(strip_checksum_param("a=1&b=2&checksum=abc"), "a=1&b=2");
        assert_eq!(strip_checksum_param("checksum=abc"), "");
        assert_eq!(strip_checksum_param(""), "");
        assert_eq!(strip_checksum_param("a=1&b=2"), "a=1&b=2");
    }

    #[test]
    fn test_checksum_param_extraction() {
        assert_eq!(checksum_param("a=1&checksum=abc123"), Some("abc123"));
        assert_eq!(checksum_param("checksum=abc123&a=1"), Some("abc123"));
        assert_eq!(checksum_param("a=1&b=2"), None);
        assert_eq!(checksum_param("checksum="), None);
        assert_eq!(checksum_param(""), None);
    }

    #[test]
    fn test_strip_checksum_param_preserves_encoding() {
        // The remaining query must keep the client's exact percent-encoding
        let query = "callbackURL=https%3A%2F%2Fexample.com%2Fcb%3Fx%3D1&checksum=abc";
        assert_eq!(
            strip_checksum_param(query),
            "callbackURL=https%3A%2F%2Fexample.com%2Fcb%3Fx%3D1"
        );
    }
}
