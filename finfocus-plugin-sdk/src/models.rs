//! # Core Data Model
//!
//! Shared types exchanged between the FinFocus engine and cost plugins.
//! Everything in this module is serde-ready: the same structs travel over
//! the plugin RPC channel and into persisted JSON documents (cache entries,
//! the dismissal store), so wire names are part of the stable contract.
//!
//! ## Overview
//!
//! The data model covers:
//! - **Resource descriptors**: the normalized input unit for every query
//! - **Plugin metadata**: name, version, providers, and capability set
//! - **Cost rows**: projected and actual cost results with structured errors
//! - **Recommendations**: per-resource suggestions with savings estimates
//! - **Budgets**: budget definitions, spend status, and health summaries
//! - **Dismissals**: the request/response pair for suppressing a recommendation
//!
//! ## Error Codes
//!
//! Structured per-row errors carry codes from a closed set
//! (`PLUGIN_ERROR`, `VALIDATION_ERROR`, `TIMEOUT_ERROR`, `NO_COST_DATA`).
//! These identifiers are a stable contract with collaborators and must not
//! be renamed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Normalized description of one infrastructure resource.
///
/// Descriptors are produced by the ingestion layer from plan/state documents
/// and are immutable within one engine operation.
///
/// # Examples
///
/// ```rust
/// use finfocus_plugin_sdk::models::ResourceDescriptor;
///
/// let resource = ResourceDescriptor::new("i-1", "aws:ec2:Instance")
///     .with_region("us-east-1")
///     .with_property("instanceType", "t3.micro");
/// assert_eq!(resource.provider, "aws");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Stable identifier of the resource within its plan
    pub id: String,
    /// Fully qualified resource type, e.g. `aws:ec2:Instance`
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Provider tag derived from the first segment of the type
    pub provider: String,
    /// Resource properties as loosely typed values
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    /// User-assigned tags
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Region the resource lives in, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl ResourceDescriptor {
    /// Create a descriptor, deriving the provider tag from the type.
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        let provider = resource_type
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            id: id.into(),
            resource_type,
            provider,
            properties: HashMap::new(),
            tags: HashMap::new(),
            region: None,
        }
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Add a property value.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Named operations a plugin may advertise.
///
/// Features govern dispatch: the engine never sends an RPC for a feature
/// the plugin did not advertise during handshake. The same identifier space
/// doubles as the capability set for optional behaviors such as
/// `dismiss_recommendations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Monthly projected cost queries
    ProjectedCosts,
    /// Historical cost series queries
    ActualCosts,
    /// Optimization recommendations
    Recommendations,
    /// Budget definitions and spend status
    Budgets,
    /// What-if cost estimates with property overrides
    EstimateCost,
    /// Server-side recommendation dismissal
    DismissRecommendations,
    /// Plugin metadata exchange
    PluginInfo,
}

impl Feature {
    /// Wire identifier for this feature.
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::ProjectedCosts => "projected_costs",
            Feature::ActualCosts => "actual_costs",
            Feature::Recommendations => "recommendations",
            Feature::Budgets => "budgets",
            Feature::EstimateCost => "estimate_cost",
            Feature::DismissRecommendations => "dismiss_recommendations",
            Feature::PluginInfo => "plugin_info",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "projected_costs" => Ok(Feature::ProjectedCosts),
            "actual_costs" => Ok(Feature::ActualCosts),
            "recommendations" => Ok(Feature::Recommendations),
            "budgets" => Ok(Feature::Budgets),
            "estimate_cost" => Ok(Feature::EstimateCost),
            "dismiss_recommendations" => Ok(Feature::DismissRecommendations),
            "plugin_info" => Ok(Feature::PluginInfo),
            other => Err(format!("unknown feature: {other}")),
        }
    }
}

/// Metadata a plugin advertises during handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, unique within one host
    pub name: String,
    /// Plugin version string
    pub version: String,
    /// Supported provider prefixes, or `*` for all providers
    #[serde(default)]
    pub providers: Vec<String>,
    /// Advertised capability set
    #[serde(default)]
    pub capabilities: HashSet<Feature>,
    /// Wire protocol version the plugin speaks
    pub protocol_version: u32,
}

impl PluginInfo {
    /// Whether this plugin claims support for the given provider tag.
    ///
    /// An empty list or a `*` entry matches every provider; otherwise each
    /// entry is treated as a prefix of the provider tag.
    pub fn supports_provider(&self, provider: &str) -> bool {
        if self.providers.is_empty() {
            return true;
        }
        self.providers
            .iter()
            .any(|p| p == "*" || provider.starts_with(p.as_str()))
    }

    /// Whether this plugin advertises the given feature.
    pub fn has_capability(&self, feature: Feature) -> bool {
        self.capabilities.contains(&feature)
    }
}

/// Closed set of structured per-row error codes.
///
/// The wire forms (`PLUGIN_ERROR`, ...) are a stable contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Plugin transport or RPC failure
    PluginError,
    /// Pre-flight validation rejected the descriptor
    ValidationError,
    /// The per-resource deadline elapsed
    TimeoutError,
    /// Every match succeeded but none had a price
    NoCostData,
}

impl ErrorCode {
    /// Wire identifier for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PluginError => "PLUGIN_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
            ErrorCode::NoCostData => "NO_COST_DATA",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error attached to a cost row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostError {
    /// Classification code from the closed set
    pub code: ErrorCode,
    /// Human-readable message, free of code prefixes
    pub message: String,
    /// Resource type the failure was observed for
    #[serde(rename = "resourceType")]
    pub resource_type: String,
}

/// Per-resource projected cost row.
///
/// Invariant: when `error` is present, `notes` never duplicates the error
/// with `ERROR:`-style prefixes; presentation layers render the structured
/// error themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostResult {
    /// Resource identifier the row belongs to
    pub resource_id: String,
    /// Fully qualified resource type
    pub resource_type: String,
    /// Provider tag
    pub provider: String,
    /// Projected monthly amount; zero when `error` is set
    pub monthly: f64,
    /// ISO currency code
    pub currency: String,
    /// Free-form notes from the answering plugin
    #[serde(default)]
    pub notes: String,
    /// Structured failure, if the row could not be priced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CostError>,
}

impl CostResult {
    /// Build a successful row for a resource.
    pub fn priced(resource: &ResourceDescriptor, monthly: f64, currency: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            resource_id: resource.id.clone(),
            resource_type: resource.resource_type.clone(),
            provider: resource.provider.clone(),
            monthly,
            currency: currency.into(),
            notes: notes.into(),
            error: None,
        }
    }

    /// Build an error row for a resource. Notes stay empty.
    pub fn failed(resource: &ResourceDescriptor, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            resource_id: resource.id.clone(),
            resource_type: resource.resource_type.clone(),
            provider: resource.provider.clone(),
            monthly: 0.0,
            currency: String::new(),
            notes: String::new(),
            error: Some(CostError {
                code,
                message: message.into(),
                resource_type: resource.resource_type.clone(),
            }),
        }
    }
}

/// A plugin's answer to a projected-cost or estimate query.
///
/// `monthly` is `None` when the plugin answered but had no price for the
/// resource; the engine turns an all-`None` match chain into `NO_COST_DATA`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectedCost {
    /// Monthly amount, absent when the plugin has no price
    #[serde(default)]
    pub monthly: Option<f64>,
    /// ISO currency code
    #[serde(default)]
    pub currency: String,
    /// Free-form notes
    #[serde(default)]
    pub notes: String,
}

/// Time window for actual-cost queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageWindow {
    /// Inclusive start of the window
    pub from: DateTime<Utc>,
    /// Exclusive end of the window
    pub to: DateTime<Utc>,
}

/// Granularity of an actual-cost series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageGranularity {
    Hourly,
    Daily,
    Monthly,
}

/// One point in an actual-cost series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualCostPoint {
    /// Amount spent within the period
    pub amount: f64,
    /// Inclusive start of the period
    pub period_start: DateTime<Utc>,
    /// Exclusive end of the period
    pub period_end: DateTime<Utc>,
}

/// Historical cost series returned by a plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActualCostSeries {
    /// Chronologically ordered points; empty means no data
    #[serde(default)]
    pub points: Vec<ActualCostPoint>,
    /// ISO currency code
    #[serde(default)]
    pub currency: String,
}

/// Action a recommendation proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationAction {
    Rightsize,
    Terminate,
    DeleteUnused,
    Migrate,
    UpgradeGeneration,
    PurchaseCommitment,
    Other,
}

/// Per-resource optimization suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Stable recommendation identifier
    pub id: String,
    /// Resource the recommendation applies to
    pub resource_id: String,
    /// Proposed action
    pub action: RecommendationAction,
    /// Estimated monthly savings
    pub estimated_savings: f64,
    /// ISO currency code
    pub currency: String,
    /// Human-readable description
    pub description: String,
    /// Provider that produced the recommendation
    pub provider: String,
}

/// Query sent to plugins for recommendations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationQuery {
    /// Resources to analyze
    pub resources: Vec<ResourceDescriptor>,
    /// Recommendation ids the host suppresses; plugins must not return them
    #[serde(default)]
    pub excluded_ids: Vec<String>,
    /// Upper bound on returned recommendations, when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<usize>,
}

/// Budget cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Monthly,
    Quarterly,
    Annual,
}

/// Alert configured on a budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    /// Spend percentage (of the budget amount) that triggers the alert
    pub threshold_percent: f64,
    /// Whether the alert has fired
    #[serde(default)]
    pub triggered: bool,
}

/// A budget definition as returned by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Stable budget identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Budgeted amount per period
    pub amount: f64,
    /// ISO currency code, `^[A-Z]{3}$`
    pub currency: String,
    /// Budget cadence
    pub period: BudgetPeriod,
    /// Configured alerts
    #[serde(default)]
    pub alerts: Vec<BudgetAlert>,
    /// Provider the budget is scoped to, when any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Region the budget is scoped to, when any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Resource types the budget is scoped to
    #[serde(default)]
    pub resource_types: Vec<String>,
    /// Free-form metadata; budget tag filters match against this map
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Health classification of a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetHealth {
    Ok,
    Warning,
    Critical,
    Exceeded,
}

/// A budget plus its current spend state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    /// The budget definition
    pub budget: Budget,
    /// Spend accumulated in the current period
    pub current_spend: f64,
    /// Forecast spend for the full period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_spend: Option<f64>,
    /// Health classification; absent when the plugin could not derive one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<BudgetHealth>,
}

/// Aggregated health counts across all currencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSummary {
    /// All budgets seen, including ones with unspecified health
    pub total: usize,
    pub ok: usize,
    pub warning: usize,
    pub critical: usize,
    pub exceeded: usize,
}

/// Hints passed to plugins when listing budgets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetFilter {
    /// Restrict to one provider, when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Restrict to budgets overlapping this window, when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<UsageWindow>,
}

/// Property overrides for what-if estimates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimateOverrides {
    /// Property values replacing the descriptor's before pricing
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

/// Request to dismiss or snooze one recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DismissRequest {
    /// Recommendation identifier
    pub id: String,
    /// Well-known reason tag
    pub reason: DismissalReason,
    /// Free-form reason when `reason` is `Other`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_reason: Option<String>,
    /// Snooze expiry; a dismissal is permanent when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Who asked for the dismissal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissed_by: Option<String>,
}

/// Well-known dismissal reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DismissalReason {
    NotApplicable,
    BusinessConstraint,
    FalsePositive,
    Deferred,
    Other,
}

/// A plugin's answer to a dismissal request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DismissResponse {
    /// Whether the plugin recorded the dismissal on its side
    pub accepted: bool,
    /// Optional detail from the plugin
    #[serde(default)]
    pub message: String,
}
