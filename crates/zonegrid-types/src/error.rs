//! Shared error type for the ZoneGrid core.

use thiserror::Error;

/// Top-level error type for the ZoneGrid messaging core.
///
/// The first four variants are caller programming errors: they indicate a
/// local bug and are returned immediately instead of being logged away.
/// Per-message protocol anomalies never surface here — the router and
/// correlator log and drop those so one bad frame cannot take the process
/// down.
#[derive(Error, Debug)]
pub enum ZoneGridError {
    /// An RPC was created without a target service.
    #[error("RPC target service is missing")]
    MissingService,

    /// An RPC was created without a method name.
    #[error("RPC target method is missing")]
    MissingMethod,

    /// A service with the same type and fingerprint is already registered.
    #[error("Service already registered: {api}@{id}")]
    DuplicateService {
        /// Service type (API URI).
        api: String,
        /// Fingerprint id of the clashing registration.
        id: String,
    },

    /// A register message was addressed to its own sender.
    #[error("Cannot create register message to self: {0}")]
    SelfRegistration(String),

    /// `write` was called without a destination.
    #[error("Message destination is missing")]
    MissingDestination,

    /// The transport-send function has not been installed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A configuration file could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred at the transport boundary.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A service event listener failed.
    #[error("Listener error: {0}")]
    Listener(String),
}

/// Alias for Result with ZoneGridError.
pub type ZoneGridResult<T> = Result<T, ZoneGridError>;
