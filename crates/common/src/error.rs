//! Gateway error taxonomy
//!
//! Tagged variants shared across the workspace. Each carries the context a
//! caller needs to decide between retry, failover to another account, and
//! surfacing to the user. `retryable()` is the hint consumed by the retry
//! layers; it is a default, not a promise.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias using the gateway error taxonomy.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection, DNS, or transport failure before an HTTP status existed.
    #[error("network error: {message}")]
    Network { message: String, retryable: bool },

    /// Non-2xx upstream HTTP response.
    #[error("api error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        headers: HashMap<String, String>,
    },

    /// Credential or refresh failure for a specific account.
    #[error("auth error: {message}")]
    Auth {
        message: String,
        account_id: Option<String>,
        retryable: bool,
    },

    /// Input rejected before any I/O happened.
    #[error("validation error on `{field}`: expected {expected}")]
    Validation { field: String, expected: String },

    /// 429-class upstream response. `code` is the upstream error code that
    /// drives rate-limit reason parsing.
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after_ms: Option<u64>,
        account_id: Option<String>,
        code: Option<String>,
    },

    /// Deadline exceeded.
    #[error("timed out: {message}")]
    Timeout { message: String },

    /// Persisted-state failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A circuit breaker refused the call.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Too many login attempts for an account key.
    #[error(transparent)]
    AuthRateLimit(#[from] AuthRateLimitError),
}

impl Error {
    /// Default retry hint for this error.
    pub fn retryable(&self) -> bool {
        match self {
            Error::Network { retryable, .. } => *retryable,
            Error::Api { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Error::Auth { retryable, .. } => *retryable,
            Error::Validation { .. } => false,
            Error::RateLimit { .. } => true,
            Error::Timeout { .. } => true,
            Error::Storage(_) => false,
            Error::CircuitOpen(_) => false,
            Error::AuthRateLimit(_) => false,
        }
    }

    /// Convenience constructor for transport failures (retryable by default).
    pub fn network(message: impl Into<String>) -> Self {
        Error::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Convenience constructor for deadline failures.
    pub fn timeout(message: impl Into<String>) -> Self {
        Error::Timeout {
            message: message.into(),
        }
    }
}

/// Storage failure code, mirroring the OS error where one exists.
///
/// `Eempty` is gateway-specific: the atomic save wrote a zero-byte temp file
/// and refused to rename it over the live target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCode {
    Eacces,
    Eperm,
    Ebusy,
    Enospc,
    Eempty,
    Unknown,
}

impl StorageCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageCode::Eacces => "EACCES",
            StorageCode::Eperm => "EPERM",
            StorageCode::Ebusy => "EBUSY",
            StorageCode::Enospc => "ENOSPC",
            StorageCode::Eempty => "EEMPTY",
            StorageCode::Unknown => "UNKNOWN",
        }
    }

    /// Platform-aware remediation hint shown to the user alongside the error.
    pub fn hint(&self, path: &Path) -> String {
        let dir = path.parent().unwrap_or(path).display();
        match self {
            StorageCode::Eacces | StorageCode::Eperm => {
                if cfg!(windows) {
                    format!(
                        "check antivirus exclusions and verify write permissions for {dir}"
                    )
                } else {
                    format!("check folder permissions; try: chmod 755 {dir}")
                }
            }
            StorageCode::Ebusy => "file is locked by another process; close it and retry".into(),
            StorageCode::Enospc => "disk full; free up space and retry".into(),
            StorageCode::Eempty => {
                "written file was 0 bytes; the original file was left untouched".into()
            }
            StorageCode::Unknown => {
                format!("verify that {dir} exists and is writable")
            }
        }
    }
}

impl std::fmt::Display for StorageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted-state failure with a code, the offending path, and a hint.
#[derive(Debug, Error)]
#[error("storage error [{}] at {}: {} ({})", .code, .path.display(), .message, .hint)]
pub struct StorageError {
    pub message: String,
    pub code: StorageCode,
    pub path: PathBuf,
    pub hint: String,
}

impl StorageError {
    pub fn new(code: StorageCode, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        let path = path.into();
        let hint = code.hint(&path);
        Self {
            message: message.into(),
            code,
            path,
            hint,
        }
    }

    /// Map an I/O error to a storage error, classifying the OS error code.
    pub fn from_io(err: &std::io::Error, path: impl Into<PathBuf>) -> Self {
        let code = match err.raw_os_error() {
            Some(libc_code) => match libc_code {
                13 => StorageCode::Eacces,
                1 => StorageCode::Eperm,
                16 => StorageCode::Ebusy,
                28 => StorageCode::Enospc,
                _ => StorageCode::Unknown,
            },
            None => match err.kind() {
                std::io::ErrorKind::PermissionDenied => StorageCode::Eacces,
                std::io::ErrorKind::StorageFull => StorageCode::Enospc,
                _ => StorageCode::Unknown,
            },
        };
        Self::new(code, path, err.to_string())
    }
}

/// A circuit breaker refused the call.
///
/// `saturated` distinguishes a fully open breaker from a half-open breaker
/// that has already spent its trial budget.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CircuitOpenError {
    pub key: String,
    pub message: String,
    pub saturated: bool,
}

/// Too many login attempts for an account key within the sliding window.
#[derive(Debug, Error)]
#[error(
    "too many login attempts for {}; retry in {}s",
    .key,
    .reset_after_ms.div_ceil(1000)
)]
pub struct AuthRateLimitError {
    pub key: String,
    pub attempts_remaining: u32,
    pub reset_after_ms: u64,
}
