//! Error types shared by every kunquat crate.
//!
//! Four kinds map to four recovery policies: `Argument` (caller broke a
//! precondition, nothing changed), `Format` (composition data is malformed
//! or inconsistent), `Memory` (an allocation failed) and `Resource` (a
//! caller-supplied callback failed).

use alloc::string::String;
use alloc::vec::Vec;
use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = core::result::Result<T, Error>;

/// Top-level error returned by every fallible operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("argument error: {0}")]
    Argument(String),

    #[error("format error: {error}")]
    Format {
        error: FormatError,
        /// Store key the error was found in, if any.
        key: Option<String>,
    },

    #[error("memory error: {0}")]
    Memory(String),

    #[error("resource error: {0}")]
    Resource(String),
}

/// The four error categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Argument,
    Format,
    Memory,
    Resource,
}

impl ErrorKind {
    /// Name used in structured error reports.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Argument => "ArgumentError",
            ErrorKind::Format => "FormatError",
            ErrorKind::Memory => "MemoryError",
            ErrorKind::Resource => "ResourceError",
        }
    }
}

impl Error {
    pub fn argument(message: impl Into<String>) -> Self {
        Error::Argument(message.into())
    }

    pub fn memory(message: impl Into<String>) -> Self {
        Error::Memory(message.into())
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Error::Resource(message.into())
    }

    /// Attach the offending store key to a format error.
    pub fn format_at(key: impl Into<String>, error: FormatError) -> Self {
        Error::Format {
            error,
            key: Some(key.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Argument(_) => ErrorKind::Argument,
            Error::Format { .. } => ErrorKind::Format,
            Error::Memory(_) => ErrorKind::Memory,
            Error::Resource(_) => ErrorKind::Resource,
        }
    }

    /// The wrapped format error, if this is one.
    pub fn format_error(&self) -> Option<&FormatError> {
        match self {
            Error::Format { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<FormatError> for Error {
    fn from(error: FormatError) -> Self {
        Error::Format { error, key: None }
    }
}

impl From<alloc::collections::TryReserveError> for Error {
    fn from(e: alloc::collections::TryReserveError) -> Self {
        Error::Memory(alloc::format!("{}", e))
    }
}

/// Malformed or inconsistent composition data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("unexpected value: {0}")]
    Schema(String),

    #[error("timestamp remainder out of range")]
    Timestamp,

    #[error("trigger {index} in column {column} is earlier than the one before it")]
    TriggerOrder { column: usize, index: usize },

    #[error("unknown event name {0:?}")]
    UnknownEvent(String),

    #[error("invalid argument for event {event:?}: {reason}")]
    EventArgument { event: String, reason: String },

    #[error("unknown processor type {0:?}")]
    UnknownProcessor(String),

    #[error("unknown audio unit type {0:?}")]
    UnknownUnitType(String),

    #[error("invalid envelope: {0}")]
    Envelope(String),

    #[error("invalid WAV data: {0}")]
    Wav(String),

    #[error("connection graph contains a cycle: {}", path.join(" -> "))]
    GraphCycle { path: Vec<String> },

    #[error("port kinds differ on edge {from} -> {to}")]
    PortMismatch { from: String, to: String },

    #[error("signal types incompatible on edge {from} -> {to}")]
    SignalType { from: String, to: String },

    #[error("invalid connection endpoint {0:?}")]
    Endpoint(String),

    #[error("missing sample {sample} for processor {processor} in audio unit {unit}")]
    MissingSample {
        unit: usize,
        processor: usize,
        sample: usize,
    },

    #[error("binding expansion deeper than {limit}")]
    BindingDepth { limit: usize },

    #[error("more than {limit} events in one slice")]
    BindingOverflow { limit: usize },

    #[error("song length could not be determined within {slices} slices")]
    DurationLimit { slices: u64 },

    #[error("{0}")]
    Inconsistent(String),
}

impl FormatError {
    /// Stable identifier of the failure, used as report context.
    pub fn kind(&self) -> &'static str {
        match self {
            FormatError::Json(_) => "json",
            FormatError::Schema(_) => "schema",
            FormatError::Timestamp => "timestamp",
            FormatError::TriggerOrder { .. } => "trigger_order",
            FormatError::UnknownEvent(_) => "unknown_event",
            FormatError::EventArgument { .. } => "event_argument",
            FormatError::UnknownProcessor(_) => "unknown_processor",
            FormatError::UnknownUnitType(_) => "unknown_unit_type",
            FormatError::Envelope(_) => "envelope",
            FormatError::Wav(_) => "wav",
            FormatError::GraphCycle { .. } => "graph_cycle",
            FormatError::PortMismatch { .. } => "port_mismatch",
            FormatError::SignalType { .. } => "signal_type",
            FormatError::Endpoint(_) => "endpoint",
            FormatError::MissingSample { .. } => "missing_sample",
            FormatError::BindingDepth { .. } => "binding_depth",
            FormatError::BindingOverflow { .. } => "binding_overflow",
            FormatError::DurationLimit { .. } => "duration_limit",
            FormatError::Inconsistent(_) => "inconsistent",
        }
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        FormatError::Inconsistent(message.into())
    }
}
