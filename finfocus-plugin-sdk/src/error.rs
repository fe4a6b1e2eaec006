//! # Plugin Host Errors
//!
//! Failure modes of the plugin host layer: launching a subprocess, reading
//! its handshake, talking RPC over the transport, resolving installed
//! binaries, and fetching release assets. The engine maps these onto the
//! structured per-row codes of [`crate::models::ErrorCode`]; this enum is
//! the richer, host-internal taxonomy.

use crate::models::Feature;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the plugin host layer.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The configured plugin binary does not exist
    #[error("plugin binary not found: {path}")]
    BinaryMissing { path: PathBuf },

    /// The subprocess could not be spawned
    #[error("failed to spawn plugin process: {source}")]
    SpawnFailed {
        #[source]
        source: std::io::Error,
    },

    /// No handshake line arrived within the startup timeout
    #[error("plugin did not complete handshake within {timeout:?}")]
    HandshakeTimeout { timeout: Duration },

    /// The handshake line did not parse
    #[error("malformed plugin handshake: {line:?}")]
    HandshakeMalformed { line: String },

    /// The plugin speaks a protocol version this host does not
    #[error("unsupported plugin protocol version {actual} (host speaks {expected})")]
    ProtocolMismatch { expected: u32, actual: u32 },

    /// Connection-level failure on the RPC channel
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The plugin answered with an error body
    #[error("plugin rpc failed: {code}: {message}")]
    Rpc { code: i32, message: String },

    /// The call's deadline elapsed before a response arrived
    #[error("rpc deadline exceeded for {method}")]
    DeadlineExceeded { method: String },

    /// The client was closed; no further calls are possible
    #[error("plugin connection is closed")]
    Closed,

    /// The plugin does not advertise the requested feature
    #[error("feature not supported by plugin: {feature}")]
    FeatureNotSupported { feature: Feature },

    /// A payload failed to serialize or deserialize
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure in the registry or installer
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP failure while fetching the release index or an asset
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A version directory or requested version is not valid semver
    #[error("invalid plugin version {version:?}: {message}")]
    InvalidVersion { version: String, message: String },

    /// The named plugin is not installed under the plugin root
    #[error("plugin not installed: {name}")]
    NotInstalled { name: String },

    /// No release within the scan bound carries a compatible asset
    #[error("no release asset compatible with {os}/{arch} for {name}")]
    NoCompatibleAsset {
        name: String,
        os: String,
        arch: String,
    },
}

impl PluginError {
    /// Shorthand for a transport error with a formatted message.
    pub fn transport(message: impl Into<String>) -> Self {
        PluginError::Transport { message: message.into() }
    }

    /// Whether this error is a connection-level failure, as opposed to a
    /// well-formed error answer from the plugin. Connection-level failures
    /// are the ones worth one retry during the initial info exchange.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PluginError::Transport { .. } | PluginError::Closed | PluginError::Io(_)
        )
    }
}

/// Result alias for plugin host operations.
pub type Result<T> = std::result::Result<T, PluginError>;
