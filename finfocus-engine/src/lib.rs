//! # FinFocus Engine
//!
//! The cost-analysis orchestrator of FinFocus. Given a batch of resource
//! descriptors and a set of launched cost plugins, the engine routes each
//! resource to the right plugins, fans the RPCs out across a bounded worker
//! pool, classifies failures into structured per-row error codes, and
//! merges everything into deterministically ordered result rows.
//!
//! ## Overview
//!
//! The engine crate provides:
//! - **Engine**: per-resource dispatch with caching, timeouts, and
//!   fallback chains ([`engine`])
//! - **Router**: glob-pattern routing with priority and fallback policy
//!   ([`router`])
//! - **Cache store**: content-addressed file cache with per-entry TTL
//!   ([`cache`])
//! - **Dismissal store**: persistent recommendation suppression with an
//!   audit history ([`dismissal`])
//! - **Budget evaluator**: filtering, health classification, and exit-code
//!   policy ([`budget`])
//! - **Configuration**: home-directory layout and environment overrides
//!   ([`config`])
//!
//! ## Example
//!
//! ```rust
//! use finfocus_engine::config::{CacheSettings, Paths};
//! use finfocus_engine::engine::Engine;
//! use finfocus_plugin_sdk::models::ResourceDescriptor;
//!
//! # async fn run(source: std::sync::Arc<dyn finfocus_plugin_sdk::CostSource>) {
//! let paths = Paths::resolve().expect("home directory");
//! let engine = Engine::builder()
//!     .with_paths(paths)
//!     .with_source(source)
//!     .build()
//!     .unwrap();
//!
//! let resources = vec![ResourceDescriptor::new("i-1", "aws:ec2:Instance")];
//! for row in engine.projected_costs(&resources).await {
//!     println!("{}: {} {}", row.resource_id, row.monthly, row.currency);
//! }
//! # }
//! ```

pub mod budget;
pub mod cache;
pub mod config;
pub mod dismissal;
pub mod engine;
pub mod error;
pub mod router;
pub mod testing;

pub use budget::BudgetFilterOptions;
pub use cache::{CacheError, CacheStore, QueryFingerprint};
pub use config::{BudgetExitPolicy, CacheSettings, Paths};
pub use dismissal::{DismissalRecord, DismissalStatus, DismissalStore, LifecycleEvent};
pub use engine::{
    ActualCostResult, BudgetReport, Engine, EngineBuilder, RecommendationOptions,
    RecommendationRow, RecommendationState,
};
pub use error::{process_exit_code, EngineError};
pub use router::{MatchReason, MatchSource, PluginMatch, RouteRule, RouteTarget, Router, RoutingConfig};

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
