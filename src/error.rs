//! Error types for rankmesh
//!
//! Every failure of a group operation is reported synchronously to the
//! caller as one of these variants. Nothing inside the crate retries.
//!
//! - Numeric error codes for machine parsing
//! - Exit codes for the CLI
//! - Hints for the operator

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::group::Rank;
use crate::tensor::DType;

/// Result type alias for rankmesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    ConnectionLost = 303,
    HandshakeFailed = 304,

    // Protocol errors (4xx)
    ProtocolVersion = 400,
    MalformedFrame = 401,

    // Group state errors (5xx)
    NotInitialized = 500,
    AlreadyInitialized = 501,
    InvalidRank = 502,
    InvalidArgument = 503,

    // Tensor errors (6xx)
    SizeMismatch = 600,
    DTypeMismatch = 601,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E303")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            600..=699 => 60,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    /// Could not establish a connection during join
    #[error("Failed to connect to {addr}: {message}")]
    ConnectionFailed { addr: String, message: String },

    /// Mesh formation did not finish in time
    #[error("Timed out after {timeout_ms}ms while {during}")]
    ConnectionTimeout { during: String, timeout_ms: u64 },

    /// An established peer connection closed, reset or timed out
    #[error("Lost connection to rank {peer}: {message}")]
    ConnectionLost { peer: Rank, message: String },

    /// A peer answered the join handshake incorrectly
    #[error("Handshake failed: {message}")]
    Handshake { peer: Option<Rank>, message: String },

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersion { expected: String, actual: String },

    /// A frame violated the wire format
    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    // ─────────────────────────────────────────────────────────────
    // Group State Errors
    // ─────────────────────────────────────────────────────────────

    /// No group has been joined in this process
    #[error("Process group has not been joined")]
    NotInitialized,

    /// A group is already joined in this process
    #[error("Process group is already joined (rank {rank} of {size})")]
    AlreadyInitialized { rank: Rank, size: u32 },

    /// Rank argument out of range or referring to self where disallowed
    #[error("Invalid rank {rank} for group of size {size}: {reason}")]
    InvalidRank {
        rank: Rank,
        size: u32,
        reason: &'static str,
    },

    /// Argument rejected before any I/O
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ─────────────────────────────────────────────────────────────
    // Tensor Errors
    // ─────────────────────────────────────────────────────────────

    /// Incoming element count differs from the receive buffer
    #[error("Size mismatch: buffer holds {expected} elements, frame carries {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Incoming element type differs from the receive buffer
    #[error("Element type mismatch: buffer is {expected}, frame carries {actual}")]
    DTypeMismatch { expected: DType, actual: DType },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::ConnectionLost { .. } => ErrorCode::ConnectionLost,
            Error::Handshake { .. } => ErrorCode::HandshakeFailed,

            Error::ProtocolVersion { .. } => ErrorCode::ProtocolVersion,
            Error::MalformedFrame { .. } => ErrorCode::MalformedFrame,

            Error::NotInitialized => ErrorCode::NotInitialized,
            Error::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Error::InvalidRank { .. } => ErrorCode::InvalidRank,
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,

            Error::SizeMismatch { .. } => ErrorCode::SizeMismatch,
            Error::DTypeMismatch { .. } => ErrorCode::DTypeMismatch,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether a fresh attempt at the same call could succeed.
    ///
    /// Only join-time connection failures qualify. A lost connection inside a
    /// session is not retryable: the group has to be left and joined again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. } | Error::ConnectionTimeout { .. }
        )
    }

    /// Whether the current session can no longer be used
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost { .. }
                | Error::MalformedFrame { .. }
                | Error::Handshake { .. }
                | Error::ProtocolVersion { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => {
                Some("Run 'rankmesh config init' to create a default configuration file.")
            }
            Error::ConfigParse { .. } => Some(
                "Check the configuration file syntax. Run 'rankmesh config validate' to see details.",
            ),
            Error::ConfigValidation { .. } => {
                Some("Every rank needs the same [group] peers list and its own rank.")
            }
            Error::ConnectionFailed { .. } | Error::ConnectionTimeout { .. } => Some(
                "Check that every rank was started and that the peer addresses are reachable.",
            ),
            Error::ConnectionLost { .. } => {
                Some("A peer went away. Leave the group and join again to continue.")
            }
            Error::Handshake { .. } => {
                Some("All ranks must be started with the same peers list and group size.")
            }
            Error::ProtocolVersion { .. } => {
                Some("All ranks must run compatible rankmesh versions. Run 'rankmesh version'.")
            }
            Error::NotInitialized => Some("Join a process group before issuing operations."),
            Error::AlreadyInitialized { .. } => {
                Some("Leave the current group before joining another one.")
            }
            Error::SizeMismatch { .. } | Error::DTypeMismatch { .. } => {
                Some("Sender and receiver must use buffers of the same element type and length.")
            }
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", self.code().as_str(), self);

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a connection lost error
    pub fn connection_lost(peer: Rank, message: impl Into<String>) -> Self {
        Error::ConnectionLost {
            peer,
            message: message.into(),
        }
    }

    /// Create a handshake error
    pub fn handshake(peer: Option<Rank>, message: impl Into<String>) -> Self {
        Error::Handshake {
            peer,
            message: message.into(),
        }
    }

    /// Create a malformed frame error
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedFrame {
            message: message.into(),
        }
    }

    /// Create an invalid rank error
    pub fn invalid_rank(rank: Rank, size: u32, reason: &'static str) -> Self {
        Error::InvalidRank { rank, size, reason }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
