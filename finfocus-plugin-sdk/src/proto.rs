//! # Wire Protocol
//!
//! The handshake line and RPC frame types shared between the host and
//! plugins. A plugin announces itself by printing a single newline-terminated
//! line on stdout:
//!
//! ```text
//! <protocol_version>|<transport>|<address>|<server_version>
//! ```
//!
//! for example `1|tcp|127.0.0.1:54321|0.2.0`. The host then connects to the
//! advertised address and exchanges length-prefixed JSON frames: a 4-byte
//! big-endian payload length followed by one serialized [`RpcRequest`] or
//! [`RpcResponse`]. Responses are correlated to requests by `id`, so a
//! single connection supports in-flight multiplexing.

use crate::error::PluginError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version this host speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Hard upper bound on one frame's payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// RPC method names for the plugin operation surface.
pub mod methods {
    pub const PLUGIN_INFO: &str = "plugin_info";
    pub const PROJECTED_COST: &str = "get_projected_cost";
    pub const ACTUAL_COST: &str = "get_actual_cost";
    pub const RECOMMENDATIONS: &str = "get_recommendations";
    pub const BUDGETS: &str = "get_budgets";
    pub const ESTIMATE_COST: &str = "estimate_cost";
    pub const DISMISS_RECOMMENDATION: &str = "dismiss_recommendation";
    /// Graceful-stop request sent before the process is terminated.
    pub const STOP: &str = "stop";
}

/// Transports a plugin may advertise in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
}

impl TransportKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "tcp" => Some(TransportKind::Tcp),
            _ => None,
        }
    }
}

/// Parsed plugin handshake line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol version the plugin speaks
    pub protocol_version: u32,
    /// Transport to connect over
    pub transport: TransportKind,
    /// Address to dial, e.g. `127.0.0.1:54321`
    pub address: String,
    /// Version string of the plugin server
    pub server_version: String,
}

impl Handshake {
    /// Parse one handshake line.
    ///
    /// The line must have exactly four `|`-separated fields; anything else
    /// is reported as [`PluginError::HandshakeMalformed`].
    pub fn parse(line: &str) -> Result<Self, PluginError> {
        let line = line.trim();
        let malformed = || PluginError::HandshakeMalformed { line: line.to_string() };

        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() != 4 {
            return Err(malformed());
        }
        let protocol_version: u32 = parts[0].parse().map_err(|_| malformed())?;
        let transport = TransportKind::parse(parts[1]).ok_or_else(malformed)?;
        if parts[2].is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            protocol_version,
            transport,
            address: parts[2].to_string(),
            server_version: parts[3].to_string(),
        })
    }
}

/// One RPC request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id echoed back in the response
    pub id: Uuid,
    /// Method name from [`methods`]
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Error body carried inside a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Plugin-defined numeric code
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

/// One RPC response frame. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Correlation id of the request being answered
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}
