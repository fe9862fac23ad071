//! Error types for IPCHECK.
//!
//! A single error hierarchy built with `thiserror`. Lookup callers never see
//! these directly: the lookup service folds them into
//! [`LookupRecord`](crate::types::LookupRecord)s. They matter inside the
//! crates, where the variant decides whether a call is retried, counted
//! against a circuit breaker, or masked as a cache miss.

use thiserror::Error;

/// Result type alias using `IpCheckError`.
pub type Result<T> = std::result::Result<T, IpCheckError>;

/// Main error type for all IPCHECK operations.
#[derive(Debug, Error)]
pub enum IpCheckError {
    // ═══════════════════════════════════════════════════════════════════════════
    // INPUT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Malformed identifier. Never retried, never cached.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // PROVIDER ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Network failure, 5xx, rate limit or unreadable body from a provider.
    #[error("Provider '{provider}' failed: {reason}")]
    ProviderTransient {
        /// Provider name
        provider: String,
        /// What went wrong
        reason: String,
    },

    /// A provider attempt exceeded its deadline.
    #[error("Provider '{provider}' timed out after {seconds}s")]
    ProviderTimeout {
        /// Provider name
        provider: String,
        /// Deadline that was exceeded
        seconds: u64,
    },

    /// The circuit breaker rejected the call without attempting it.
    #[error("Circuit open for provider '{provider}'")]
    CircuitOpen {
        /// Provider name
        provider: String,
    },

    // ═══════════════════════════════════════════════════════════════════════════
    // PERSISTENCE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Disk tier read/write failure or corrupt data.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// On-disk format version mismatch.
    #[error("Format version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version this build reads
        expected: u8,
        /// Version found on disk
        actual: u8,
    },

    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IpCheckError {
    /// Creates a transient provider error.
    pub fn transient(provider: impl Into<String>, reason: impl ToString) -> Self {
        IpCheckError::ProviderTransient {
            provider: provider.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if this error is recoverable (can retry).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IpCheckError::ProviderTransient { .. } | IpCheckError::ProviderTimeout { .. }
        )
    }

    /// Returns true if this is a disk tier error.
    pub fn is_persistence_error(&self) -> bool {
        matches!(
            self,
            IpCheckError::Persistence(_)
                | IpCheckError::Io(_)
                | IpCheckError::Json(_)
                | IpCheckError::VersionMismatch { .. }
        )
    }

    /// Returns true if the call was rejected by a circuit breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, IpCheckError::CircuitOpen { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IpCheckError::ProviderTimeout {
            provider: "ip-api.com".into(),
            seconds: 5,
        };
        assert!(err.to_string().contains("ip-api.com"));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_struct_variant_display() {
        let err = IpCheckError::VersionMismatch { expected: 1, actual: 7 };
        assert_eq!(err.to_string(), "Format version mismatch: expected 1, got 7");
        assert_eq!(
            IpCheckError::transient("ipinfo.io", "HTTP 503").to_string(),
            "Provider 'ipinfo.io' failed: HTTP 503"
        );
        assert_eq!(
            IpCheckError::CircuitOpen { provider: "ipinfo.io".into() }.to_string(),
            "Circuit open for provider 'ipinfo.io'"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(IpCheckError::transient("p", "503").is_recoverable());
        assert!(IpCheckError::ProviderTimeout { provider: "p".into(), seconds: 1 }.is_recoverable());
        assert!(!IpCheckError::InvalidInput("x".into()).is_recoverable());
        assert!(!IpCheckError::CircuitOpen { provider: "p".into() }.is_recoverable());

        assert!(IpCheckError::Persistence("bad blob".into()).is_persistence_error());
        assert!(!IpCheckError::Config("x".into()).is_persistence_error());

        assert!(IpCheckError::CircuitOpen { provider: "p".into() }.is_circuit_open());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid");
        let result: Result<serde_json::Value> = json_result.map_err(IpCheckError::from);
        assert!(matches!(result, Err(IpCheckError::Json(_))));
    }
}
