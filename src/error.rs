//! Errors surfaced by the constrained key search.
//!
//! Only three conditions ever cross the search boundary. Ordinary resample
//! events (even anchor residue, empty interval, short modulus, ...) are
//! handled inside [`crate::search`] and never appear here.

/// Terminal outcome of a failed key search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeygenError {
    /// The key specification can never produce a key (even target, odd or
    /// undersized bit length, unusable exponent). Not retryable.
    InvalidSpec { name: String, reason: String },
    /// A constructed key failed its post-construction check. Indicates an
    /// arithmetic defect; must not be retried.
    InternalInvariantViolation { name: String, detail: String },
    /// The attempt budget ran out before a key was found.
    SearchExhausted { name: String, attempts: u64 },
}

impl KeygenError {
    pub(crate) fn invalid_spec(name: &str, reason: impl Into<String>) -> Self {
        KeygenError::InvalidSpec {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// True for failures that abort a whole batch regardless of
    /// `--keep-going`: the spec is unusable or the arithmetic is broken.
    pub fn aborts_batch(&self) -> bool {
        matches!(
            self,
            KeygenError::InvalidSpec { .. } | KeygenError::InternalInvariantViolation { .. }
        )
    }

    /// Name of the key specification the error belongs to.
    pub fn key_name(&self) -> &str {
        match self {
            KeygenError::InvalidSpec { name, .. }
            | KeygenError::InternalInvariantViolation { name, .. }
            | KeygenError::SearchExhausted { name, .. } => name,
        }
    }
}

impl std::fmt::Display for KeygenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeygenError::InvalidSpec { name, reason } => {
                write!(f, "invalid key spec '{}': {}", name, reason)
            }
            KeygenError::InternalInvariantViolation { name, detail } => {
                write!(f, "internal invariant violated for '{}': {}", name, detail)
            }
            KeygenError::SearchExhausted { name, attempts } => write!(
                f,
                "search for '{}' exhausted after {} anchor primes",
                name, attempts
            ),
        }
    }
}

impl std::error::Error for KeygenError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_does_not_abort_batch() {
        let invalid = KeygenError::invalid_spec("a", "even target");
        let exhausted = KeygenError::SearchExhausted {
            name: "b".into(),
            attempts: 10,
        };
        let broken = KeygenError::InternalInvariantViolation {
            name: "c".into(),
            detail: "residue 0x1".into(),
        };
        assert!(invalid.aborts_batch());
        assert!(!exhausted.aborts_batch());
        assert!(broken.aborts_batch());
    }

    #[test]
    fn display_names_the_key() {
        let err = KeygenError::SearchExhausted {
            name: "haven-rom-dev".into(),
            attempts: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("haven-rom-dev"));
        assert!(msg.contains("42"));
        assert_eq!(err.key_name(), "haven-rom-dev");
    }

    #[test]
    fn converts_into_anyhow() {
        let err: anyhow::Error = KeygenError::invalid_spec("x", "bad").into();
        assert!(err.downcast_ref::<KeygenError>().is_some());
    }
}
