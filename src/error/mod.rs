use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

pub mod codes;
pub mod helpers;

pub use codes::{describe_error_code, ErrorCode};
pub use helpers::{common, ErrorExt};

/// The unified error type for a batch run.
///
/// Only setup-level failures travel through this type. Failures of a single
/// work item are recorded in the execution log instead and never abort the run.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Setup error: {message}")]
    Setup {
        code: u16,
        message: String,
        procedure: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Storage error: {message}")]
    Storage {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Execution error: {message}")]
    Execution {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Merge error: {message}")]
    Merge {
        code: u16,
        message: String,
        procedure: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BatchError {
    /// Create a configuration error with specific code and path
    pub fn config_with_code(
        code: u16,
        message: impl Into<String>,
        path: Option<PathBuf>,
    ) -> Self {
        Self::Config {
            code,
            message: message.into(),
            path,
            source: None,
        }
    }

    /// Create a setup error tied to one procedure
    pub fn setup_with_code(
        code: u16,
        message: impl Into<String>,
        procedure: Option<String>,
    ) -> Self {
        Self::Setup {
            code,
            message: message.into(),
            procedure,
            source: None,
        }
    }

    /// Create a storage error with default code
    pub fn storage(message: impl Into<String>) -> Self {
        Self::storage_with_code(ErrorCode::STORAGE_GENERIC, message, None)
    }

    /// Create a storage error with specific code and path
    pub fn storage_with_code(code: u16, message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Storage {
            code,
            message: message.into(),
            path,
            source: None,
        }
    }

    pub fn execution_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Execution {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a merge error for one procedure
    pub fn merge_with_code(
        code: u16,
        procedure: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Merge {
            code,
            message: message.into(),
            procedure: Some(procedure.into()),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Setup { source: src, .. }
            | Self::Storage { source: src, .. }
            | Self::Execution { source: src, .. }
            | Self::Merge { source: src, .. } => {
                *src = Some(source.into());
            }
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Config { message, .. }
            | Self::Setup { message, .. }
            | Self::Storage { message, .. }
            | Self::Execution { message, .. }
            | Self::Merge { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
        }
        self
    }

    /// Attach a path to config and storage errors
    pub fn with_path(mut self, new_path: impl Into<PathBuf>) -> Self {
        if let Self::Config { path, .. } | Self::Storage { path, .. } = &mut self {
            *path = Some(new_path.into());
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Setup { code, .. }
            | Self::Storage { code, .. }
            | Self::Execution { code, .. }
            | Self::Merge { code, .. } => *code,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, path, .. } => match path {
                Some(p) => format!("Configuration problem in {}: {}", p.display(), message),
                None => format!("Configuration problem: {}", message),
            },
            Self::Setup {
                message, procedure, ..
            } => match procedure {
                Some(p) => format!("Setup failed for procedure {}: {}", p, message),
                None => format!("Setup failed: {}", message),
            },
            Self::Storage { message, path, .. } => match path {
                Some(p) => format!("Storage error at {}: {}", p.display(), message),
                None => format!("Storage error: {}", message),
            },
            Self::Execution { message, .. } => format!("Execution error: {}", message),
            Self::Merge {
                message, procedure, ..
            } => match procedure {
                Some(p) => format!("Merge of {} failed: {}", p, message),
                None => format!("Merge failed: {}", message),
            },
        }
    }
}

/// Type alias for Results using BatchError
pub type Result<T> = std::result::Result<T, BatchError>;

impl From<std::io::Error> for BatchError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, message) = match err.kind() {
            ErrorKind::NotFound => (ErrorCode::STORAGE_NOT_FOUND, "File or directory not found"),
            ErrorKind::PermissionDenied => {
                (ErrorCode::STORAGE_PERMISSION_DENIED, "Permission denied")
            }
            ErrorKind::AlreadyExists => (ErrorCode::STORAGE_ALREADY_EXISTS, "Already exists"),
            _ => (ErrorCode::STORAGE_IO_ERROR, "IO operation failed"),
        };

        BatchError::storage_with_code(code, message, None).with_source(err)
    }
}

impl From<csv::Error> for BatchError {
    fn from(err: csv::Error) -> Self {
        BatchError::storage_with_code(ErrorCode::STORAGE_CSV_ERROR, "CSV operation failed", None)
            .with_source(err)
    }
}
