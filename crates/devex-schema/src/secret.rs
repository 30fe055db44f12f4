//! Single-owner secret byte buffer (§3 "SecureSecret", §9 design note).
//!
//! Never log or serialize a `SecureSecret`. It deliberately does not implement
//! `Serialize`, `Display`, or `Debug` with its contents -- only a redacted
//! `Debug` impl -- so a stray `{:?}` in a log line cannot leak it.

/// A mutable byte container that must be explicitly cleared after use.
///
/// `reveal()` is expected to be called at most once, immediately before the
/// secret is consumed (e.g. written to a child's stdin). Ownership transfer
/// is by move -- there is no `Clone` impl.
pub struct SecureSecret {
    bytes: Option<Vec<u8>>,
}

impl SecureSecret {
    /// Takes ownership of `bytes` as a new secret.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes: Some(bytes) }
    }

    /// Wraps a `String`'s bytes as a secret.
    pub fn from_string(s: String) -> Self {
        Self::new(s.into_bytes())
    }

    /// Consumes the secret and returns it as a `String`.
    ///
    /// Returns `None` if the secret was already cleared or previously
    /// revealed, or if the bytes are not valid UTF-8.
    pub fn reveal(&mut self) -> Option<String> {
        self.bytes.take().and_then(|b| String::from_utf8(b).ok())
    }

    /// Zeroes the underlying buffer and detaches it.
    pub fn clear(&mut self) {
        if let Some(mut b) = self.bytes.take() {
            for byte in &mut b {
                *byte = 0;
            }
        }
    }

    /// Whether the secret has already been revealed or cleared.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_none()
    }
}

impl Drop for SecureSecret {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for SecureSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSecret").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reveal_returns_contents_once() {
        let mut secret = SecureSecret::from_string("hunter2".to_string());
        assert_eq!(secret.reveal().as_deref(), Some("hunter2"));
        assert_eq!(secret.reveal(), None);
    }

    #[test]
    fn clear_detaches_bytes() {
        let mut secret = SecureSecret::from_string("hunter2".to_string());
        secret.clear();
        assert!(secret.is_empty());
        assert_eq!(secret.reveal(), None);
    }

    #[test]
    fn debug_never_prints_contents() {
        let secret = SecureSecret::from_string("hunter2".to_string());
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
