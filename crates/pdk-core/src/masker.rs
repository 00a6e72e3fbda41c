// Output masker. Holds every secret value disclosed during a run and
// rewrites text streams so those values never reach a log sink.

use crate::constants::MASK_TOKEN;
use parking_lot::RwLock;
use std::sync::Arc;

/// A thread-safe registry of secret strings with replace-on-scan semantics.
///
/// Registration is append-only for the lifetime of an invocation; scans
/// operate on an immutable snapshot taken under the read lock. Longer
/// secrets are replaced first so that a secret which is a substring of
/// another cannot leave a partial remainder behind.
#[derive(Debug, Clone)]
pub struct SecretMasker {
    inner: Arc<RwLock<MaskerInner>>,
}

#[derive(Debug)]
struct MaskerInner {
    /// Registered plaintext values, sorted by length descending.
    values: Vec<String>,
    /// Length of the shortest registered value, for the fast-path check.
    min_len: usize,
}

impl Default for SecretMasker {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretMasker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MaskerInner {
                values: Vec::new(),
                min_len: 0,
            })),
        }
    }

    /// Register a secret value. Empty and whitespace-only values are
    /// ignored; duplicates are collapsed.
    pub fn register(&self, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }

        let mut inner = self.inner.write();
        if inner.values.iter().any(|v| v == trimmed) {
            return;
        }
        inner.values.push(trimmed.to_string());
        inner.values.sort_by(|a, b| b.len().cmp(&a.len()));
        inner.min_len = inner.values.iter().map(|v| v.len()).min().unwrap_or(0);
    }

    /// Replace every registered secret in `input` with the mask token.
    pub fn mask(&self, input: &str) -> String {
        let inner = self.inner.read();
        if inner.values.is_empty() || input.len() < inner.min_len {
            return input.to_string();
        }

        let mut result = input.to_string();
        for value in &inner.values {
            if result.contains(value.as_str()) {
                result = result.replace(value.as_str(), MASK_TOKEN);
            }
        }
        result
    }

    /// Returns true when `input` contains at least one registered secret.
    pub fn contains_secret(&self, input: &str) -> bool {
        let inner = self.inner.read();
        inner.values.iter().any(|v| input.contains(v.as_str()))
    }

    /// Number of registered secrets.
    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_value_in_stream() {
        let masker = SecretMasker::new();
        masker.register("abc-123-xyz");
        assert_eq!(
            masker.mask("my key is abc-123-xyz and more"),
            "my key is *** and more"
        );
    }

    #[test]
    fn test_longer_secret_masked_first() {
        let masker = SecretMasker::new();
        masker.register("token");
        masker.register("token-extended");
        assert_eq!(masker.mask("use token-extended here"), "use *** here");
    }

    #[test]
    fn test_empty_values_ignored() {
        let masker = SecretMasker::new();
        masker.register("");
        masker.register("   ");
        assert!(masker.is_empty());
    }

    #[test]
    fn test_duplicate_registration_collapsed() {
        let masker = SecretMasker::new();
        masker.register("s3cr3t");
        masker.register("s3cr3t");
        assert_eq!(masker.len(), 1);
    }

    #[test]
    fn test_no_secrets_is_identity() {
        let masker = SecretMasker::new();
        assert_eq!(masker.mask("plain output"), "plain output");
    }

    #[test]
    fn test_multiple_occurrences() {
        let masker = SecretMasker::new();
        masker.register("hunter2");
        assert_eq!(masker.mask("hunter2 hunter2"), "*** ***");
    }

    #[test]
    fn test_contains_secret() {
        let masker = SecretMasker::new();
        masker.register("apikey");
        assert!(masker.contains_secret("x apikey y"));
        assert!(!masker.contains_secret("nothing here"));
    }
}
