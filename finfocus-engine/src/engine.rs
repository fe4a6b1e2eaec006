//! # Engine
//!
//! The orchestrator: consumes a batch of resource descriptors and an
//! operation, routes each resource to plugins, fans the RPCs out across a
//! bounded worker pool, classifies failures into structured per-row error
//! codes, and merges everything into a deterministically ordered result.
//!
//! ## Dispatch pipeline
//!
//! For each resource a worker:
//!
//! 1. Validates the descriptor: an empty id or type yields a
//!    `VALIDATION_ERROR` row without any RPC being attempted.
//! 2. Asks the [`Router`] for matches; with no routing configured the
//!    engine falls back to querying every source that advertises the
//!    feature and claims the resource's provider.
//! 3. Consults the cache under a normalized query fingerprint; a fresh hit
//!    returns without touching a plugin.
//! 4. Walks the match list: each RPC runs under the per-resource deadline.
//!    A timeout classifies as `TIMEOUT_ERROR`, a transport or RPC failure
//!    as `PLUGIN_ERROR`; a non-fallback match ends the chain on failure. A
//!    successful answer without data lets the chain continue. When the
//!    chain ends without data the row carries the last failure, or
//!    `NO_COST_DATA` when every match answered empty.
//! 5. Writes the first successful row through to the cache (best-effort,
//!    WARN on failure).
//!
//! Per-resource failures never fail the batch; they ride inside each row's
//! `error` field. Output order always equals input order regardless of
//! completion order. Dropping the returned future cancels all in-flight
//! RPCs.

use crate::budget::{self, BudgetFilterOptions};
use crate::cache::{CacheError, CacheStore, QueryFingerprint};
use crate::config::{BudgetExitPolicy, CacheSettings, Paths};
use crate::dismissal::{DismissalStatus, DismissalStore};
use crate::error::EngineError;
use crate::router::{MatchReason, MatchSource, PluginMatch, Router, RoutingConfig};
use chrono::Utc;
use finfocus_plugin_sdk::client::CostSource;
use finfocus_plugin_sdk::models::{
    ActualCostPoint, BudgetFilter, BudgetStatus, BudgetSummary, CostError, CostResult,
    DismissRequest, DismissResponse, ErrorCode, EstimateOverrides, Feature, ProjectedCost,
    Recommendation, RecommendationQuery, ResourceDescriptor, UsageGranularity, UsageWindow,
};
use finfocus_plugin_sdk::PluginError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Default worker-pool size for batch operations.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Default per-resource deadline.
pub const DEFAULT_RESOURCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for the recommendations operation.
#[derive(Debug, Clone, Default)]
pub struct RecommendationOptions {
    /// Upper bound on returned recommendations
    pub max_count: Option<usize>,
    /// Merge locally dismissed/snoozed records into the output
    pub include_dismissed: bool,
}

/// Lifecycle state a recommendation row is annotated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationState {
    Active,
    Dismissed,
    Snoozed,
}

/// One recommendation with its lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRow {
    pub recommendation: Recommendation,
    pub state: RecommendationState,
}

/// Per-resource actual-cost row.
#[derive(Debug, Clone, Serialize)]
pub struct ActualCostResult {
    pub resource_id: String,
    pub resource_type: String,
    pub provider: String,
    /// Chronological cost points; empty when `error` is set
    pub points: Vec<ActualCostPoint>,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CostError>,
}

/// Collected and filtered budgets plus their summary.
#[derive(Debug, Clone)]
pub struct BudgetReport {
    pub statuses: Vec<BudgetStatus>,
    pub summary: BudgetSummary,
}

/// Builder for [`Engine`], following the usual `with_*` idiom.
pub struct EngineBuilder {
    sources: HashMap<String, Arc<dyn CostSource>>,
    source_order: Vec<String>,
    routing: RoutingConfig,
    paths: Option<Paths>,
    cache_settings: Option<CacheSettings>,
    concurrency: usize,
    resource_timeout: Duration,
    exit_policy: BudgetExitPolicy,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            sources: HashMap::new(),
            source_order: Vec::new(),
            routing: RoutingConfig::default(),
            paths: None,
            cache_settings: None,
            concurrency: DEFAULT_CONCURRENCY,
            resource_timeout: DEFAULT_RESOURCE_TIMEOUT,
            exit_policy: BudgetExitPolicy::default(),
        }
    }

    /// Register a cost source. Registration order is the order the
    /// automatic (unrouted) fallback queries sources in.
    pub fn with_source(mut self, source: Arc<dyn CostSource>) -> Self {
        let name = source.name().to_string();
        if self.sources.insert(name.clone(), source).is_none() {
            self.source_order.push(name);
        }
        self
    }

    /// Apply a routing configuration.
    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    /// Anchor the stores at a home-directory layout.
    pub fn with_paths(mut self, paths: Paths) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Override the cache settings (otherwise derived from the paths and
    /// environment).
    pub fn with_cache_settings(mut self, settings: CacheSettings) -> Self {
        self.cache_settings = Some(settings);
        self
    }

    /// Bound the worker pool. Values below 1 are raised to 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Override the per-resource deadline.
    pub fn with_resource_timeout(mut self, timeout: Duration) -> Self {
        self.resource_timeout = timeout;
        self
    }

    /// Apply a budget exit-code policy.
    pub fn with_budget_exit_policy(mut self, policy: BudgetExitPolicy) -> Self {
        self.exit_policy = policy;
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<Engine, EngineError> {
        let paths = match self.paths {
            Some(paths) => paths,
            None => Paths::resolve().ok_or_else(|| EngineError::Config {
                message: "cannot resolve a home directory; set FINFOCUS_HOME".to_string(),
            })?,
        };
        let cache_settings = self
            .cache_settings
            .unwrap_or_else(|| CacheSettings::from_env(&paths));
        Ok(Engine {
            sources: self.sources,
            source_order: self.source_order,
            router: Router::new(self.routing),
            cache: CacheStore::new(cache_settings),
            dismissed_path: paths.dismissed_file(),
            logs_dir: Some(paths.logs_dir()),
            concurrency: self.concurrency,
            resource_timeout: self.resource_timeout,
            exit_policy: self.exit_policy,
        })
    }
}

/// The cost-analysis orchestrator.
pub struct Engine {
    sources: HashMap<String, Arc<dyn CostSource>>,
    source_order: Vec<String>,
    router: Router,
    cache: CacheStore,
    dismissed_path: PathBuf,
    logs_dir: Option<PathBuf>,
    concurrency: usize,
    resource_timeout: Duration,
    exit_policy: BudgetExitPolicy,
}

impl Engine {
    /// Start building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// The cache store this engine writes through.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Projected monthly costs for a batch of resources. Output order
    /// equals input order.
    pub async fn projected_costs(&self, resources: &[ResourceDescriptor]) -> Vec<CostResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let workers = resources.iter().map(|resource| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.projected_one(resource).await
            }
        });
        futures::future::join_all(workers).await
    }

    /// Historical costs for a batch of resources over a window.
    pub async fn actual_costs(
        &self,
        resources: &[ResourceDescriptor],
        window: UsageWindow,
        granularity: UsageGranularity,
    ) -> Vec<ActualCostResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let workers = resources.iter().map(|resource| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.actual_one(resource, window, granularity).await
            }
        });
        futures::future::join_all(workers).await
    }

    /// What-if estimate for one resource with property overrides.
    pub async fn estimate_cost(
        &self,
        resource: &ResourceDescriptor,
        overrides: &EstimateOverrides,
    ) -> CostResult {
        if let Some(error) = preflight(resource) {
            return row_from_error(resource, error);
        }
        let key = QueryFingerprint::new("estimate", resource)
            .with_overrides(overrides)
            .key();
        if let Some(row) = self.cache_lookup::<CostResult>(&key).await {
            return row;
        }
        let matches = self.route(resource, Feature::EstimateCost);
        let mut failure: Option<CostError> = None;
        for (index, matched) in matches.iter().enumerate() {
            let Some(source) = self.sources.get(&matched.plugin) else { continue };
            let outcome = tokio::time::timeout(
                self.resource_timeout,
                source.estimate_cost(resource, overrides),
            )
            .await;
            match self.judge_cost_outcome(resource, matched, stops_chain(&matches, index), outcome) {
                CostOutcome::Priced(cost) => {
                    let row = priced_row(resource, &cost);
                    self.cache_store(&key, &row).await;
                    return row;
                }
                CostOutcome::NoData => {}
                CostOutcome::Failed { error, stop } => {
                    failure = Some(error);
                    if stop {
                        break;
                    }
                }
            }
        }
        row_without_data(resource, failure, matches.is_empty())
    }

    async fn projected_one(&self, resource: &ResourceDescriptor) -> CostResult {
        if let Some(error) = preflight(resource) {
            return row_from_error(resource, error);
        }
        let key = QueryFingerprint::new("projected", resource).key();
        if let Some(row) = self.cache_lookup::<CostResult>(&key).await {
            return row;
        }
        let matches = self.route(resource, Feature::ProjectedCosts);
        let mut failure: Option<CostError> = None;
        for (index, matched) in matches.iter().enumerate() {
            let Some(source) = self.sources.get(&matched.plugin) else { continue };
            let outcome =
                tokio::time::timeout(self.resource_timeout, source.projected_cost(resource)).await;
            match self.judge_cost_outcome(resource, matched, stops_chain(&matches, index), outcome) {
                CostOutcome::Priced(cost) => {
                    let row = priced_row(resource, &cost);
                    self.cache_store(&key, &row).await;
                    return row;
                }
                CostOutcome::NoData => {}
                CostOutcome::Failed { error, stop } => {
                    failure = Some(error);
                    if stop {
                        break;
                    }
                }
            }
        }
        row_without_data(resource, failure, matches.is_empty())
    }

    async fn actual_one(
        &self,
        resource: &ResourceDescriptor,
        window: UsageWindow,
        granularity: UsageGranularity,
    ) -> ActualCostResult {
        if let Some(error) = preflight(resource) {
            return actual_row_from_error(resource, error);
        }
        let key = QueryFingerprint::new("actual", resource)
            .with_date_range(window.from, window.to)
            .with_filter("granularity", format!("{granularity:?}").to_lowercase())
            .key();
        if let Some(row) = self.cache_lookup::<CachedActualRow>(&key).await {
            return row.into_result(resource);
        }
        let matches = self.route(resource, Feature::ActualCosts);
        let mut failure: Option<CostError> = None;
        for (index, matched) in matches.iter().enumerate() {
            let Some(source) = self.sources.get(&matched.plugin) else { continue };
            let outcome = tokio::time::timeout(
                self.resource_timeout,
                source.actual_cost(resource, window, granularity),
            )
            .await;
            match outcome {
                Err(_) => {
                    failure = Some(timeout_error(resource, &matched.plugin, self.resource_timeout));
                    if stops_chain(&matches, index) {
                        break;
                    }
                }
                Ok(Err(err)) => {
                    failure = Some(classify_plugin_error(resource, &matched.plugin, &err));
                    if stops_chain(&matches, index) {
                        break;
                    }
                }
                Ok(Ok(series)) => {
                    if !series.points.is_empty() {
                        let row = ActualCostResult {
                            resource_id: resource.id.clone(),
                            resource_type: resource.resource_type.clone(),
                            provider: resource.provider.clone(),
                            points: series.points,
                            currency: series.currency,
                            error: None,
                        };
                        self.cache_store(&key, &CachedActualRow::from_result(&row)).await;
                        return row;
                    }
                }
            }
        }
        let error = failure.unwrap_or_else(|| CostError {
            code: ErrorCode::NoCostData,
            message: if matches.is_empty() {
                "no plugin available for this resource".to_string()
            } else {
                "no plugin returned cost data".to_string()
            },
            resource_type: resource.resource_type.clone(),
        });
        actual_row_from_error(resource, error)
    }

    /// Recommendations for a batch, reconciled against the dismissal store.
    pub async fn recommendations(
        &self,
        resources: &[ResourceDescriptor],
        options: RecommendationOptions,
    ) -> Vec<RecommendationRow> {
        let mut store = DismissalStore::open(&self.dismissed_path, self.logs_dir.clone());
        let now = Utc::now();
        if let Err(err) = store.clean_expired_snoozes(now) {
            warn!(error = %err, "failed to clean expired snoozes");
        }
        let excluded = store.dismissed_ids(now);
        let query = RecommendationQuery {
            resources: resources.to_vec(),
            excluded_ids: excluded.clone(),
            max_count: options.max_count,
        };

        let plugin_names = self.recommendation_targets(resources);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let workers = plugin_names.iter().map(|name| {
            let semaphore = Arc::clone(&semaphore);
            let query = &query;
            async move {
                let _permit = semaphore.acquire().await.ok();
                let source = self.sources.get(name)?;
                match tokio::time::timeout(self.resource_timeout, source.recommendations(query)).await
                {
                    Ok(Ok(recommendations)) => Some(recommendations),
                    Ok(Err(err)) => {
                        warn!(plugin = %name, error = %err, "recommendations query failed");
                        None
                    }
                    Err(_) => {
                        warn!(plugin = %name, "recommendations query timed out");
                        None
                    }
                }
            }
        });
        let collected = futures::future::join_all(workers).await;

        // Dedupe by id, keeping the row with the larger savings estimate.
        let mut by_id: HashMap<String, Recommendation> = HashMap::new();
        for recommendation in collected.into_iter().flatten().flatten() {
            if excluded.contains(&recommendation.id) {
                continue;
            }
            match by_id.get(&recommendation.id) {
                Some(existing) if existing.estimated_savings >= recommendation.estimated_savings => {}
                _ => {
                    by_id.insert(recommendation.id.clone(), recommendation);
                }
            }
        }

        let mut active: Vec<Recommendation> = by_id.into_values().collect();
        active.sort_by(|a, b| {
            b.estimated_savings
                .partial_cmp(&a.estimated_savings)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(max) = options.max_count {
            active.truncate(max);
        }

        let mut rows: Vec<RecommendationRow> = active
            .into_iter()
            .map(|recommendation| RecommendationRow {
                recommendation,
                state: RecommendationState::Active,
            })
            .collect();

        if options.include_dismissed {
            let mut suppressed: Vec<RecommendationRow> = store
                .all_records()
                .iter()
                .filter(|(_, record)| record.is_suppressed(now))
                .filter_map(|(_, record)| {
                    record.last_known.as_ref().map(|last_known| RecommendationRow {
                        recommendation: last_known.clone(),
                        state: match record.status {
                            DismissalStatus::Dismissed => RecommendationState::Dismissed,
                            DismissalStatus::Snoozed => RecommendationState::Snoozed,
                        },
                    })
                })
                .collect();
            suppressed.sort_by(|a, b| a.recommendation.id.cmp(&b.recommendation.id));
            rows.extend(suppressed);
        }

        rows
    }

    /// Budgets across every source advertising the feature, filtered and
    /// summarized. Exit-code evaluation is separate; see
    /// [`Engine::evaluate_budget_exit`].
    pub async fn budgets(
        &self,
        filter: &BudgetFilter,
        options: &BudgetFilterOptions,
    ) -> BudgetReport {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let workers = self
            .source_order
            .iter()
            .filter(|name| {
                self.sources
                    .get(*name)
                    .is_some_and(|source| source.supports(Feature::Budgets))
            })
            .map(|name| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await.ok();
                    let source = self.sources.get(name)?;
                    match tokio::time::timeout(self.resource_timeout, source.budgets(filter)).await {
                        Ok(Ok(statuses)) => Some(statuses),
                        Ok(Err(err)) => {
                            warn!(plugin = %name, error = %err, "budget query failed");
                            None
                        }
                        Err(_) => {
                            warn!(plugin = %name, "budget query timed out");
                            None
                        }
                    }
                }
            });
        let collected: Vec<BudgetStatus> = futures::future::join_all(workers)
            .await
            .into_iter()
            .flatten()
            .flatten()
            .collect();

        let statuses = budget::filter(collected, options);
        let summary = budget::summarize(&statuses);
        BudgetReport { statuses, summary }
    }

    /// Apply the configured exit-code policy to a budget report.
    pub fn evaluate_budget_exit(&self, report: &BudgetReport) -> Result<(), EngineError> {
        budget::evaluate_exit(self.exit_policy, &report.statuses)
    }

    /// Dismiss a recommendation: forward to every source with the
    /// capability, then persist locally regardless of what plugins said.
    /// The local store is authoritative for filtering.
    pub async fn dismiss_recommendation(
        &self,
        request: &DismissRequest,
        last_known: Option<Recommendation>,
    ) -> Result<DismissResponse, EngineError> {
        let mut accepted_upstream = false;
        for name in &self.source_order {
            let Some(source) = self.sources.get(name) else { continue };
            if !source.supports(Feature::DismissRecommendations) {
                continue;
            }
            match tokio::time::timeout(self.resource_timeout, source.dismiss_recommendation(request))
                .await
            {
                Ok(Ok(response)) if response.accepted => accepted_upstream = true,
                Ok(Ok(response)) => {
                    debug!(plugin = %name, message = %response.message, "plugin declined dismissal");
                }
                Ok(Err(err)) => {
                    warn!(plugin = %name, error = %err, "dismissal rpc failed");
                }
                Err(_) => {
                    warn!(plugin = %name, "dismissal rpc timed out");
                }
            }
        }

        let mut store = DismissalStore::open(&self.dismissed_path, self.logs_dir.clone());
        store.dismiss(request, last_known)?;

        Ok(DismissResponse {
            accepted: true,
            message: if accepted_upstream {
                "dismissal recorded locally and upstream".to_string()
            } else {
                "dismissal recorded locally".to_string()
            },
        })
    }

    /// Remove a local dismissal, restoring the recommendation to default
    /// listings. Returns whether a record existed.
    pub async fn undismiss_recommendation(&self, id: &str) -> Result<bool, EngineError> {
        let mut store = DismissalStore::open(&self.dismissed_path, self.logs_dir.clone());
        Ok(store.undismiss(id)?)
    }

    /// Router matches for a resource, falling back to every source that
    /// advertises the feature and claims the resource's provider when
    /// routing is unconfigured for it.
    fn route(&self, resource: &ResourceDescriptor, feature: Feature) -> Vec<PluginMatch> {
        let matches = self.router.matches(resource, feature, &self.sources);
        if !matches.is_empty() {
            return matches;
        }
        self.source_order
            .iter()
            .filter(|name| {
                self.sources.get(*name).is_some_and(|source| {
                    source.supports(feature)
                        && source.plugin_info().supports_provider(&resource.provider)
                })
            })
            .map(|name| PluginMatch {
                plugin: name.clone(),
                priority: 0,
                fallback: true,
                reason: MatchReason::Automatic,
                source: MatchSource::Automatic,
            })
            .collect()
    }

    /// Plugins to ask for recommendations: the union of per-resource routed
    /// targets in first-seen order, or every capable source for an empty
    /// batch.
    fn recommendation_targets(&self, resources: &[ResourceDescriptor]) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if resources.is_empty() {
            for name in &self.source_order {
                if self
                    .sources
                    .get(name)
                    .is_some_and(|source| source.supports(Feature::Recommendations))
                {
                    names.push(name.clone());
                }
            }
            return names;
        }
        for resource in resources {
            for matched in self.route(resource, Feature::Recommendations) {
                if !names.contains(&matched.plugin) {
                    names.push(matched.plugin);
                }
            }
        }
        names
    }

    fn judge_cost_outcome(
        &self,
        resource: &ResourceDescriptor,
        matched: &PluginMatch,
        stop_on_failure: bool,
        outcome: Result<Result<ProjectedCost, PluginError>, tokio::time::error::Elapsed>,
    ) -> CostOutcome {
        match outcome {
            Err(_) => CostOutcome::Failed {
                error: timeout_error(resource, &matched.plugin, self.resource_timeout),
                stop: stop_on_failure,
            },
            Ok(Err(err)) => CostOutcome::Failed {
                error: classify_plugin_error(resource, &matched.plugin, &err),
                stop: stop_on_failure,
            },
            Ok(Ok(cost)) => match cost.monthly {
                Some(_) => CostOutcome::Priced(cost),
                None => CostOutcome::NoData,
            },
        }
    }

    async fn cache_lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.cache.is_enabled() {
            return None;
        }
        match self.cache.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    Some(value)
                }
                Err(err) => {
                    warn!(key, error = %err, "cache entry failed to decode");
                    None
                }
            },
            Ok(None) => None,
            Err(CacheError::Disabled) => None,
            Err(err) => {
                warn!(key, error = %err, "cache read failed");
                None
            }
        }
    }

    async fn cache_store<T: Serialize>(&self, key: &str, value: &T) {
        if !self.cache.is_enabled() {
            return;
        }
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key, error = %err, "cache entry failed to encode");
                return;
            }
        };
        match self.cache.set(key, &bytes).await {
            Ok(()) | Err(CacheError::Disabled) => {}
            Err(err) => {
                warn!(key, error = %err, "cache write failed");
            }
        }
    }
}

enum CostOutcome {
    Priced(ProjectedCost),
    NoData,
    Failed { error: CostError, stop: bool },
}

/// Whether a failure at `index` ends the match chain. The chain continues
/// when the failing match permits fallthrough, or when the next match is a
/// designated fallback target.
fn stops_chain(matches: &[PluginMatch], index: usize) -> bool {
    if matches[index].fallback {
        return false;
    }
    !matches.get(index + 1).is_some_and(|next| next.fallback)
}

/// Cacheable projection of an [`ActualCostResult`] success row.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
struct CachedActualRow {
    points: Vec<ActualCostPoint>,
    currency: String,
}

impl CachedActualRow {
    fn from_result(row: &ActualCostResult) -> Self {
        Self { points: row.points.clone(), currency: row.currency.clone() }
    }

    fn into_result(self, resource: &ResourceDescriptor) -> ActualCostResult {
        ActualCostResult {
            resource_id: resource.id.clone(),
            resource_type: resource.resource_type.clone(),
            provider: resource.provider.clone(),
            points: self.points,
            currency: self.currency,
            error: None,
        }
    }
}

/// Reject descriptors that cannot be dispatched, before any RPC.
fn preflight(resource: &ResourceDescriptor) -> Option<CostError> {
    let message = if resource.id.trim().is_empty() {
        "resource id must not be empty"
    } else if resource.resource_type.trim().is_empty() {
        "resource type must not be empty"
    } else {
        return None;
    };
    Some(CostError {
        code: ErrorCode::ValidationError,
        message: message.to_string(),
        resource_type: resource.resource_type.clone(),
    })
}

fn classify_plugin_error(resource: &ResourceDescriptor, plugin: &str, err: &PluginError) -> CostError {
    let code = match err {
        PluginError::DeadlineExceeded { .. } => ErrorCode::TimeoutError,
        _ => ErrorCode::PluginError,
    };
    CostError {
        code,
        message: format!("plugin {plugin}: {err}"),
        resource_type: resource.resource_type.clone(),
    }
}

fn timeout_error(resource: &ResourceDescriptor, plugin: &str, deadline: Duration) -> CostError {
    CostError {
        code: ErrorCode::TimeoutError,
        message: format!("plugin {plugin} exceeded the {deadline:?} deadline"),
        resource_type: resource.resource_type.clone(),
    }
}

fn priced_row(resource: &ResourceDescriptor, cost: &ProjectedCost) -> CostResult {
    CostResult::priced(
        resource,
        cost.monthly.unwrap_or_default(),
        cost.currency.clone(),
        cost.notes.clone(),
    )
}

fn row_from_error(resource: &ResourceDescriptor, error: CostError) -> CostResult {
    CostResult {
        resource_id: resource.id.clone(),
        resource_type: resource.resource_type.clone(),
        provider: resource.provider.clone(),
        monthly: 0.0,
        currency: String::new(),
        notes: String::new(),
        error: Some(error),
    }
}

fn row_without_data(
    resource: &ResourceDescriptor,
    failure: Option<CostError>,
    unroutable: bool,
) -> CostResult {
    let error = failure.unwrap_or_else(|| CostError {
        code: ErrorCode::NoCostData,
        message: if unroutable {
            "no plugin available for this resource".to_string()
        } else {
            "no plugin returned a price".to_string()
        },
        resource_type: resource.resource_type.clone(),
    });
    row_from_error(resource, error)
}

fn actual_row_from_error(resource: &ResourceDescriptor, error: CostError) -> ActualCostResult {
    ActualCostResult {
        resource_id: resource.id.clone(),
        resource_type: resource.resource_type.clone(),
        provider: resource.provider.clone(),
        points: Vec::new(),
        currency: String::new(),
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;

    fn engine_with(sources: Vec<Arc<dyn CostSource>>, dir: &std::path::Path) -> Engine {
        let mut builder = Engine::builder()
            .with_paths(Paths::new(dir))
            .with_cache_settings(CacheSettings::new(dir.join("cache")).disabled());
        for source in sources {
            builder = builder.with_source(source);
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn empty_id_is_rejected_before_any_rpc() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeSource::new("aws").price("", 10.0, "USD"));
        let engine = engine_with(vec![fake.clone()], dir.path());

        let resource = ResourceDescriptor::new("", "aws:ec2:Instance");
        let rows = engine.projected_costs(std::slice::from_ref(&resource)).await;

        assert_eq!(rows.len(), 1);
        let error = rows[0].error.as_ref().unwrap();
        assert_eq!(error.code, ErrorCode::ValidationError);
        assert!(rows[0].notes.is_empty());
        assert_eq!(fake.cost_calls(), 0, "validation failures must not reach the plugin");
    }

    #[tokio::test]
    async fn all_empty_answers_classify_as_no_cost_data() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeSource::new("aws").no_price("i-1"));
        let engine = engine_with(vec![fake], dir.path());

        let resource = ResourceDescriptor::new("i-1", "aws:ec2:Instance");
        let rows = engine.projected_costs(std::slice::from_ref(&resource)).await;
        assert_eq!(rows[0].error.as_ref().unwrap().code, ErrorCode::NoCostData);
    }

    #[tokio::test]
    async fn slow_plugins_classify_as_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeSource::new("aws").hang("i-1", Duration::from_secs(5)));
        let engine = Engine::builder()
            .with_paths(Paths::new(dir.path()))
            .with_cache_settings(CacheSettings::new(dir.path().join("cache")).disabled())
            .with_source(fake)
            .with_resource_timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        let resource = ResourceDescriptor::new("i-1", "aws:ec2:Instance");
        let rows = engine.projected_costs(std::slice::from_ref(&resource)).await;
        assert_eq!(rows[0].error.as_ref().unwrap().code, ErrorCode::TimeoutError);
    }

    #[tokio::test]
    async fn provider_mismatch_is_not_queried_automatically() {
        let dir = tempfile::tempdir().unwrap();
        let azure_only = Arc::new(
            FakeSource::new("azure")
                .with_providers(&["azure"])
                .price("i-1", 9.0, "USD"),
        );
        let engine = engine_with(vec![azure_only.clone()], dir.path());

        let resource = ResourceDescriptor::new("i-1", "aws:ec2:Instance");
        let rows = engine.projected_costs(std::slice::from_ref(&resource)).await;

        assert_eq!(rows[0].error.as_ref().unwrap().code, ErrorCode::NoCostData);
        assert_eq!(azure_only.cost_calls(), 0);
    }

    #[tokio::test]
    async fn dismissal_persists_locally_even_when_plugins_decline() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeSource::new("aws").rejecting_dismissals());
        let engine = engine_with(vec![fake.clone()], dir.path());

        let request = DismissRequest {
            id: "R-1".to_string(),
            reason: finfocus_plugin_sdk::models::DismissalReason::NotApplicable,
            custom_reason: None,
            expires_at: None,
            dismissed_by: None,
        };
        let response = engine.dismiss_recommendation(&request, None).await.unwrap();
        assert!(response.accepted);
        assert_eq!(fake.dismiss_calls(), 1);

        let store = DismissalStore::open(dir.path().join("dismissed.json"), None);
        assert!(store.get("R-1").is_some());
    }
}
