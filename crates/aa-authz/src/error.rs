// error.rs — Error types for the authorization service.

use thiserror::Error;

/// Failures of a state collaborator (agents, policies, consents, spend).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A JSON state file is malformed.
    #[error("serialization error at {path}: {source}")]
    Serialization {
        path: String,
        source: serde_json::Error,
    },

    /// An agent or policy document failed to load.
    #[error(transparent)]
    Policy(#[from] aa_policy::PolicyError),

    /// The backing store refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failures loading `settings.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Errors returned by the authorization service.
///
/// DENIED is a decision, not an error: an unknown or inactive agent, a
/// failed rule, or a spend limit all produce an `Ok` result. These variants
/// are reserved for requests that could not be evaluated at all.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// The request is malformed. Nothing was evaluated or audited.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A store or the audit sink failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("consent not found: {0}")]
    ConsentNotFound(String),

    /// A consent state change the lifecycle does not permit.
    #[error(transparent)]
    Consent(aa_policy::PolicyError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AuthzError {
    /// Process exit code for command-line callers.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl From<StoreError> for AuthzError {
    fn from(e: StoreError) -> Self {
        AuthzError::StoreUnavailable(e.to_string())
    }
}

/// Convert AuditError to AuthzError. An audit write that fails means the
/// decision cannot be recorded, which callers must treat as unavailable.
impl From<aa_audit::AuditError> for AuthzError {
    fn from(e: aa_audit::AuditError) -> Self {
        AuthzError::StoreUnavailable(format!("audit: {}", e))
    }
}
