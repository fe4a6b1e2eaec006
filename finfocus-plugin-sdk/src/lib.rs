//! # FinFocus Plugin SDK
//!
//! The plugin host layer of FinFocus: everything needed to launch an
//! out-of-process cost provider, discover its capabilities, and talk to it
//! over a typed RPC surface.
//!
//! ## Overview
//!
//! The SDK provides:
//! - **Shared data model**: resource descriptors, cost rows, recommendations,
//!   budgets, and the closed error-code set ([`models`])
//! - **Wire protocol**: the stdout handshake line and length-prefixed JSON
//!   RPC frames ([`proto`])
//! - **Process launcher**: subprocess spawn, handshake supervision, and the
//!   graceful-shutdown ladder ([`launcher`])
//! - **RPC transport**: one multiplexed connection per plugin ([`transport`])
//! - **Typed client**: [`client::PluginClient`] and the [`client::CostSource`]
//!   trait the engine dispatches through
//! - **Registry**: discovery of installed plugin binaries with semver
//!   resolution ([`registry`])
//! - **Installer**: release-asset fetching with a fallback-to-latest-stable
//!   policy ([`installer`])
//! - **Host set**: launch-everything/close-everything lifecycle for one
//!   invocation ([`host::PluginSet`])
//! - **Plugin server**: the plugin-author side of the protocol; implement
//!   [`client::CostSource`] and call [`server::serve`] ([`server`])
//!
//! ## Launching a plugin
//!
//! ```rust
//! use finfocus_plugin_sdk::client::{CostSource, PluginClient};
//! use finfocus_plugin_sdk::registry::PluginRegistry;
//!
//! # async fn run() -> finfocus_plugin_sdk::Result<()> {
//! let registry = PluginRegistry::resolve(None)?;
//! let installed = registry.resolve_version("aws", None)?;
//! let home = finfocus_plugin_sdk::home::resolve_home_dir().unwrap();
//!
//! let client = PluginClient::launch(registry.launch_options(&installed, &home)).await?;
//! println!("{} v{}", client.plugin_info().name, client.plugin_info().version);
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod home;
pub mod host;
pub mod installer;
pub mod launcher;
pub mod models;
pub mod proto;
pub mod registry;
pub mod server;
pub mod transport;

pub use client::{CostSource, PluginClient};
pub use host::PluginSet;
pub use error::PluginError;
pub use installer::{FallbackPolicy, InstallOutcome, Installer};
pub use launcher::{LaunchOptions, LaunchedPlugin};
pub use models::{
    ActualCostPoint, ActualCostSeries, Budget, BudgetFilter, BudgetHealth, BudgetStatus,
    BudgetSummary, CostError, CostResult, DismissRequest, DismissResponse, DismissalReason,
    ErrorCode, EstimateOverrides, Feature, PluginInfo, ProjectedCost, Recommendation,
    RecommendationAction, RecommendationQuery, ResourceDescriptor, UsageGranularity, UsageWindow,
};
pub use proto::{Handshake, PROTOCOL_VERSION};
pub use registry::{InstalledPlugin, PluginRegistry};

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, PluginError>;
