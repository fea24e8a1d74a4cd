//! Deterministic, keyed hashing for change detection (spec.md §3, §4.1).
//!
//! `source_hash` must be deterministic over `text || "\0" || canonical copy
//! columns`, keyed by a shared secret carried on the `NlpDefinition`
//! (`hashphrase` in the INI config). BLAKE3's keyed mode gives us a fast,
//! well-reviewed MAC without pulling in a separate HMAC crate — the corpus
//! already depends on `blake3` for non-keyed content hashing
//! (`casparian_sinks::job_prefix`), so this reuses that dependency rather
//! than adding `hmac`/`sha2` for a single call site.

use std::fmt;

/// A 64-character hex-encoded BLAKE3 keyed hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SourceHash(String);

impl SourceHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 32-byte key derived from the NLP definition's `hashphrase`.
#[derive(Clone)]
pub struct HashKey([u8; 32]);

impl HashKey {
    /// Derive a hash key from an arbitrary-length secret phrase.
    ///
    /// The phrase itself is hashed (unkeyed) into 32 bytes so operators can
    /// configure any passphrase length in `hashphrase`.
    pub fn from_phrase(phrase: &str) -> Self {
        Self(*blake3::hash(phrase.as_bytes()).as_bytes())
    }
}

/// Canonicalize copy column values into a stable string for hashing.
///
/// Values are joined with `\x01` (a byte that cannot appear in normal text
/// copy-column values) so that `["a", "bc"]` and `["ab", "c"]` hash
/// differently.
pub fn canonicalize_copy_values(values: &[Option<String>]) -> String {
    values
        .iter()
        .map(|v| v.as_deref().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\u{1}")
}

/// Compute the keyed `source_hash` over `text || "\0" || canonical copy
/// columns`, per spec.md §3.
pub fn compute_source_hash(key: &HashKey, text: &str, copy_values: &[Option<String>]) -> SourceHash {
    let canonical = canonicalize_copy_values(copy_values);
    let mut message = String::with_capacity(text.len() + 1 + canonical.len());
    message.push_str(text);
    message.push('\0');
    message.push_str(&canonical);

    let digest = blake3::keyed_hash(&key.0, message.as_bytes());
    SourceHash(digest.to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_produces_same_hash() {
        let key = HashKey::from_phrase("shared-secret");
        let a = compute_source_hash(&key, "CRP 45 mg/L", &[Some("RID001".into())]);
        let b = compute_source_hash(&key, "CRP 45 mg/L", &[Some("RID001".into())]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_text_changes_hash() {
        let key = HashKey::from_phrase("shared-secret");
        let a = compute_source_hash(&key, "CRP 45", &[]);
        let b = compute_source_hash(&key, "CRP 60", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn different_key_changes_hash_for_same_text() {
        let a = compute_source_hash(&HashKey::from_phrase("key-one"), "CRP 45", &[]);
        let b = compute_source_hash(&HashKey::from_phrase("key-two"), "CRP 45", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn copy_column_boundary_is_not_confusable() {
        let key = HashKey::from_phrase("k");
        let a = compute_source_hash(&key, "x", &[Some("a".into()), Some("bc".into())]);
        let b = compute_source_hash(&key, "x", &[Some("ab".into()), Some("c".into())]);
        assert_ne!(a, b);
    }
}
