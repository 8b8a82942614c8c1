use sha2::{Digest, Sha256};

/// How a caller supplied key is turned into the key part of a storage handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyEncoding {
    /// Remove every character outside `[A-Za-z0-9_-]`, see [sanitize_key].
    ///
    /// Distinct keys can collapse onto the same window (`1.2.3.4` and `12.3.4` both become
    /// `1234`), so they share a limit.
    #[default]
    Strip,
    /// Use the lowercase hex SHA-256 digest of the raw key.
    ///
    /// Keeps distinct keys apart, at the cost of storage names that no longer resemble the key.
    Sha256,
}

impl KeyEncoding {
    pub fn encode(self, key: &str) -> String {
        match self {
            Self::Strip => sanitize_key(key),
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(key.as_bytes());
                hex::encode(hasher.finalize())
            }
        }
    }
}

/// Strips every character that is not an ASCII letter, digit, `_` or `-`.
///
/// The result is safe to embed in a file name or a Redis key. Applying it twice gives the same
/// result as applying it once.
pub fn sanitize_key(key: &str) -> String {
    key.chars().filter(|c| is_allowed(*c)).collect()
}

pub(crate) fn is_valid_identifier(identifier: &str) -> bool {
    !identifier.is_empty() && identifier.chars().all(is_allowed)
}

pub(crate) fn storage_key(identifier: &str, key: &str, encoding: KeyEncoding) -> String {
    format!("{identifier}_{}", encoding.encode(key))
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("142.250.187.206"), "142250187206");
        assert_eq!(sanitize_key("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_key("user_name-01"), "user_name-01");
        assert_eq!(sanitize_key("2a00:1450:4009:81f::/64"), "2a001450400981f64");
        // Non-ASCII letters are stripped too
        assert_eq!(sanitize_key("héllo"), "hllo");
        assert_eq!(sanitize_key(""), "");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for key in [
            "1.2.3.4",
            "::1",
            "a b\tc\n",
            "already_clean-123",
            "%2e%2e/%2F",
            "ключ",
        ] {
            let once = sanitize_key(key);
            assert_eq!(sanitize_key(&once), once);
        }
    }

    #[test]
    fn test_stripping_collides() {
        assert_eq!(
            KeyEncoding::Strip.encode("1.2.3.4"),
            KeyEncoding::Strip.encode("12.3.4")
        );
        assert_ne!(
            KeyEncoding::Sha256.encode("1.2.3.4"),
            KeyEncoding::Sha256.encode("12.3.4")
        );
    }

    #[test]
    fn test_sha256_encoding() {
        assert_eq!(
            KeyEncoding::Sha256.encode("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_storage_key() {
        assert_eq!(
            storage_key("login", "1.2.3.4", KeyEncoding::Strip),
            "login_1234"
        );
        assert!(is_valid_identifier("login"));
        assert!(is_valid_identifier("api-v2_internal"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("../login"));
    }
}
