//! # Plugin Client
//!
//! The typed, host-side representation of one live plugin, and the
//! [`CostSource`] trait that is the seam between the engine and whatever
//! answers cost queries. In production the only implementation is
//! [`PluginClient`]: a launched subprocess plus an RPC connection plus the
//! plugin's cached metadata. In tests the engine is driven by in-memory
//! fakes implementing the same trait.
//!
//! ## Lifecycle
//!
//! `uninitialized → launching → handshaked → ready ⇄ in-use → closing → closed`
//!
//! [`PluginClient::launch`] runs the ladder up to `ready`: it spawns the
//! subprocess, parses the handshake, dials the advertised address, and
//! fetches [`PluginInfo`] (retried once on a transport error, since a plugin
//! that just bound its listener can lose the first connection). [`PluginClient::close`]
//! is idempotent: it sends the graceful-stop RPC best-effort, closes the
//! transport, and walks the subprocess shutdown ladder. Every operation
//! after close returns [`PluginError::Closed`].

use crate::error::PluginError;
use crate::launcher::{self, LaunchOptions, LaunchedPlugin};
use crate::models::{
    ActualCostSeries, BudgetFilter, BudgetStatus, DismissRequest, DismissResponse,
    EstimateOverrides, Feature, PluginInfo, ProjectedCost, Recommendation, RecommendationQuery,
    ResourceDescriptor, UsageGranularity, UsageWindow,
};
use crate::proto::{methods, PROTOCOL_VERSION};
use crate::transport::RpcConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Upper bound the client itself puts on any single RPC, independent of the
/// engine's per-resource deadline. Keeps the pending-call map bounded when a
/// plugin never answers.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for the best-effort graceful-stop RPC during close.
const STOP_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// A source of cost data the engine can dispatch to.
///
/// Implemented by [`PluginClient`] for real plugins and by in-memory fakes
/// in engine tests. Implementations must be safe to share across the
/// engine's worker pool.
#[async_trait::async_trait]
pub trait CostSource: Send + Sync {
    /// Stable name of the source within one engine invocation.
    fn name(&self) -> &str;

    /// Cached metadata the source advertised.
    fn plugin_info(&self) -> &PluginInfo;

    /// Whether the source advertises the given feature.
    fn supports(&self, feature: Feature) -> bool {
        self.plugin_info().has_capability(feature)
    }

    /// Monthly projected cost for one resource.
    async fn projected_cost(&self, resource: &ResourceDescriptor) -> Result<ProjectedCost, PluginError>;

    /// Historical cost series for one resource.
    async fn actual_cost(
        &self,
        resource: &ResourceDescriptor,
        window: UsageWindow,
        granularity: UsageGranularity,
    ) -> Result<ActualCostSeries, PluginError>;

    /// Recommendations across a batch of resources.
    async fn recommendations(&self, query: &RecommendationQuery) -> Result<Vec<Recommendation>, PluginError>;

    /// Budgets with their spend status.
    async fn budgets(&self, filter: &BudgetFilter) -> Result<Vec<BudgetStatus>, PluginError>;

    /// What-if cost estimate with property overrides.
    async fn estimate_cost(
        &self,
        resource: &ResourceDescriptor,
        overrides: &EstimateOverrides,
    ) -> Result<ProjectedCost, PluginError>;

    /// Forward a dismissal to the source.
    async fn dismiss_recommendation(&self, request: &DismissRequest) -> Result<DismissResponse, PluginError>;

    /// Release the source. Default is a no-op for in-memory sources.
    async fn close(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// A live plugin: subprocess, RPC channel, and cached metadata.
pub struct PluginClient {
    info: PluginInfo,
    conn: RpcConnection,
    process: Mutex<Option<LaunchedPlugin>>,
    closed: AtomicBool,
    call_timeout: Duration,
    shutdown_grace: Duration,
    kill_wait: Duration,
}

impl PluginClient {
    /// Launch a plugin and bring it to the `ready` state.
    pub async fn launch(options: LaunchOptions) -> Result<Self, PluginError> {
        let mut plugin = launcher::launch(&options).await?;

        let handshake = plugin.handshake().clone();
        if handshake.protocol_version != PROTOCOL_VERSION {
            plugin.shutdown(Duration::ZERO, options.kill_wait).await;
            return Err(PluginError::ProtocolMismatch {
                expected: PROTOCOL_VERSION,
                actual: handshake.protocol_version,
            });
        }

        let conn = match RpcConnection::connect(&handshake.address).await {
            Ok(conn) => conn,
            Err(err) => {
                plugin.shutdown(Duration::ZERO, options.kill_wait).await;
                return Err(err);
            }
        };

        let info = match Self::fetch_info(&conn).await {
            Ok(info) => info,
            Err(err) if err.is_transport() => {
                debug!(error = %err, "plugin info exchange failed, retrying once");
                match Self::fetch_info(&conn).await {
                    Ok(info) => info,
                    Err(err) => {
                        conn.close().await;
                        plugin.shutdown(Duration::ZERO, options.kill_wait).await;
                        return Err(err);
                    }
                }
            }
            Err(err) => {
                conn.close().await;
                plugin.shutdown(Duration::ZERO, options.kill_wait).await;
                return Err(err);
            }
        };

        debug!(
            plugin = %info.name,
            version = %info.version,
            capabilities = info.capabilities.len(),
            "plugin ready"
        );

        Ok(Self {
            info,
            conn,
            process: Mutex::new(Some(plugin)),
            closed: AtomicBool::new(false),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            shutdown_grace: options.shutdown_grace,
            kill_wait: options.kill_wait,
        })
    }

    async fn fetch_info(conn: &RpcConnection) -> Result<PluginInfo, PluginError> {
        let value = conn
            .call(methods::PLUGIN_INFO, serde_json::Value::Null, Duration::from_secs(5))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Whether the plugin advertises the given capability.
    pub fn has_capability(&self, feature: Feature) -> bool {
        self.info.has_capability(feature)
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        feature: Feature,
        method: &str,
        params: &P,
    ) -> Result<R, PluginError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PluginError::Closed);
        }
        if !self.has_capability(feature) {
            return Err(PluginError::FeatureNotSupported { feature });
        }
        let value = self
            .conn
            .call(method, serde_json::to_value(params)?, self.call_timeout)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Close the client: graceful-stop RPC, transport teardown, subprocess
    /// shutdown. Idempotent; concurrent callers after the first return
    /// immediately.
    pub async fn close(&self) -> Result<(), PluginError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.conn.is_closed() {
            if let Err(err) = self
                .conn
                .call(methods::STOP, serde_json::Value::Null, STOP_CALL_TIMEOUT)
                .await
            {
                debug!(plugin = %self.info.name, error = %err, "graceful stop rpc failed");
            }
        }
        self.conn.close().await;
        if let Some(mut plugin) = self.process.lock().await.take() {
            plugin.shutdown(self.shutdown_grace, self.kill_wait).await;
        } else {
            warn!(plugin = %self.info.name, "close found no attached process");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CostSource for PluginClient {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn plugin_info(&self) -> &PluginInfo {
        &self.info
    }

    async fn projected_cost(&self, resource: &ResourceDescriptor) -> Result<ProjectedCost, PluginError> {
        self.call(
            Feature::ProjectedCosts,
            methods::PROJECTED_COST,
            &json!({ "resource": resource }),
        )
        .await
    }

    async fn actual_cost(
        &self,
        resource: &ResourceDescriptor,
        window: UsageWindow,
        granularity: UsageGranularity,
    ) -> Result<ActualCostSeries, PluginError> {
        self.call(
            Feature::ActualCosts,
            methods::ACTUAL_COST,
            &json!({
                "resource": resource,
                "window": window,
                "granularity": granularity,
            }),
        )
        .await
    }

    async fn recommendations(&self, query: &RecommendationQuery) -> Result<Vec<Recommendation>, PluginError> {
        self.call(Feature::Recommendations, methods::RECOMMENDATIONS, query)
            .await
    }

    async fn budgets(&self, filter: &BudgetFilter) -> Result<Vec<BudgetStatus>, PluginError> {
        self.call(Feature::Budgets, methods::BUDGETS, filter).await
    }

    async fn estimate_cost(
        &self,
        resource: &ResourceDescriptor,
        overrides: &EstimateOverrides,
    ) -> Result<ProjectedCost, PluginError> {
        self.call(
            Feature::EstimateCost,
            methods::ESTIMATE_COST,
            &json!({ "resource": resource, "overrides": overrides }),
        )
        .await
    }

    async fn dismiss_recommendation(&self, request: &DismissRequest) -> Result<DismissResponse, PluginError> {
        self.call(
            Feature::DismissRecommendations,
            methods::DISMISS_RECOMMENDATION,
            request,
        )
        .await
    }

    async fn close(&self) -> Result<(), PluginError> {
        PluginClient::close(self).await
    }
}
