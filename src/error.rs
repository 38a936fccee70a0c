//! Error types for the Hive operator

use thiserror::Error;

/// Main error type for Hive operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A referenced secret does not exist
    #[error("secret {namespace}/{secret} not found")]
    SecretNotFound {
        /// Namespace the secret was looked up in
        namespace: String,
        /// Name of the missing secret
        secret: String,
    },

    /// A secret exists but does not carry an expected data key
    #[error("secret {secret} did not contain key {key}")]
    MissingSecretKey {
        /// Name of the secret that was read
        secret: String,
        /// The data key that was expected
        key: String,
    },

    /// A resource blob could not be introspected
    #[error("unknown object: {0}")]
    UnknownObject(String),

    /// Applying a resource to the managed cluster failed
    #[error("apply error: {0}")]
    Apply(String),

    /// Patching an object on the managed cluster failed
    #[error("patch error: {0}")]
    Patch(String),

    /// Deleting an object on the managed cluster failed
    #[error("deletion error: {0}")]
    Deletion(String),
}

impl Error {
    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a missing-secret-key error for the given secret and key
    pub fn missing_secret_key(secret: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingSecretKey {
            secret: secret.into(),
            key: key.into(),
        }
    }

    /// Create an unknown-object error with the given message
    pub fn unknown_object(msg: impl Into<String>) -> Self {
        Self::UnknownObject(msg.into())
    }

    /// Create an apply error with the given message
    pub fn apply(msg: impl Into<String>) -> Self {
        Self::Apply(msg.into())
    }

    /// Create a patch error with the given message
    pub fn patch(msg: impl Into<String>) -> Self {
        Self::Patch(msg.into())
    }

    /// Create a deletion error with the given message
    pub fn deletion(msg: impl Into<String>) -> Self {
        Self::Deletion(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Reporting in Fleet Operations
    // ==========================================================================
    //
    // These tests demonstrate how errors surface during cluster installation
    // and sync reconciliation. Each error type represents a different failure
    // category with specific handling requirements.

    /// Story: A missing kubeconfig key names the exact secret and key
    ///
    /// When an admin kubeconfig secret exists but lacks the expected data
    /// key, the operator cannot reach the managed cluster. The error names
    /// both the secret and the key so the operator's logs point straight at
    /// the misconfigured secret.
    #[test]
    fn missing_secret_key_names_secret_and_key() {
        let err = Error::missing_secret_key("c1-admin-kubeconfig", "kubeconfig");
        assert_eq!(
            err.to_string(),
            "secret c1-admin-kubeconfig did not contain key kubeconfig"
        );
    }

    /// Story: Error helper functions accept both String and &str
    ///
    /// For ergonomic API usage, error constructors accept anything that
    /// implements Into<String>.
    #[test]
    fn constructors_accept_string_and_str() {
        let name = "prod-cluster";
        let err = Error::apply(format!("server rejected manifest for {name}"));
        assert!(err.to_string().contains("prod-cluster"));

        let err = Error::serialization("invalid YAML document");
        assert!(err.to_string().contains("serialization error"));
    }

    /// Story: Errors are categorized for proper handling in controllers
    ///
    /// Different error types require different handling strategies in the
    /// reconciliation loop: transient platform and remote-cluster failures
    /// retry with backoff, while structural blob errors need a spec change.
    #[test]
    fn variants_are_categorized_for_retry_handling() {
        fn is_retryable(err: &Error) -> bool {
            // Everything except structural blob errors can recover on retry.
            !matches!(err, Error::UnknownObject(_) | Error::Serialization(_))
        }

        assert!(is_retryable(&Error::apply("connection refused")));
        assert!(is_retryable(&Error::deletion("timeout")));
        assert!(!is_retryable(&Error::unknown_object("no kind field")));
    }
}
