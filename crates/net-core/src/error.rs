//! Error types for interface mirror operations

use thiserror::Error;

/// Kernel error numbers the commit engine reacts to
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const EOPNOTSUPP: i32 = 95;
    pub const EADDRNOTAVAIL: i32 = 99;

    pub fn describe(code: i32) -> &'static str {
        match code {
            EPERM => "Operation not permitted",
            EBUSY => "Device or resource busy",
            EEXIST => "File exists",
            ENODEV => "No such device",
            EINVAL => "Invalid argument",
            EOPNOTSUPP => "Operation not supported",
            EADDRNOTAVAIL => "Cannot assign requested address",
            _ => "Unknown error",
        }
    }
}

/// Main error type for interface mirror operations
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Interface {name} was not created")]
    Create { name: String },

    #[error("Convergence error: {0}")]
    Convergence(String),

    #[error("Partial commit error: {0}")]
    PartialCommit(ErrorReport),

    #[error("Can not resolve port {reference}")]
    UnresolvedReference { reference: String },

    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("Commit hook failed: {0}")]
    Hook(String),

    #[error("{error}; rollback failed: {rollback}")]
    RollbackFailed {
        error: Box<NetworkError>,
        rollback: Box<NetworkError>,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NetworkError {
    pub fn convergence(message: impl Into<String>) -> Self {
        NetworkError::Convergence(message.into())
    }

    /// Errno of a passthrough kernel error
    pub fn kernel_code(&self) -> Option<i32> {
        match self {
            NetworkError::Kernel(err) => err.code(),
            _ => None,
        }
    }

    /// Step errors collected by a partial commit
    pub fn partial_errors(&self) -> Option<&[NetworkError]> {
        match self {
            NetworkError::PartialCommit(report) => Some(&report.0),
            _ => None,
        }
    }
}

/// Errors reported by the kernel transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("netlink error {code}: {message}")]
    Netlink { code: i32, message: String },

    #[error("illegal IP address: {0}")]
    IllegalAddress(String),

    #[error("transport closed")]
    Closed,
}

impl KernelError {
    pub fn netlink(code: i32) -> Self {
        KernelError::Netlink {
            code,
            message: errno::describe(code).to_string(),
        }
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            KernelError::Netlink { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is(&self, code: i32) -> bool {
        self.code() == Some(code)
    }
}

/// Misuse of the API, never retryable
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("interface {name} is invalidated")]
    Invalidated { name: String },

    #[error("no open transaction in explicit mode")]
    NoTransaction,

    #[error("unknown transaction {id}")]
    UnknownTransaction { id: String },
}

/// Field registry and settings errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown field: {field}")]
    UnknownField { field: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

/// Wrapper used to present multiple step failures as a single error payload.
#[derive(Debug, Default)]
pub struct ErrorReport(pub Vec<NetworkError>);

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for error in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl From<Vec<NetworkError>> for ErrorReport {
    fn from(value: Vec<NetworkError>) -> Self {
        ErrorReport(value)
    }
}
