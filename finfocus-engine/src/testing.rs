//! In-memory [`CostSource`] fakes for driving the engine without real
//! plugin subprocesses. Used by this crate's own tests and available to
//! embedders writing their own.

use finfocus_plugin_sdk::client::CostSource;
use finfocus_plugin_sdk::models::{
    ActualCostSeries, BudgetFilter, BudgetStatus, DismissRequest, DismissResponse,
    EstimateOverrides, Feature, PluginInfo, ProjectedCost, Recommendation, RecommendationQuery,
    ResourceDescriptor, UsageGranularity, UsageWindow,
};
use finfocus_plugin_sdk::PluginError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// How a fake answers a cost query for one resource id.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    /// Answer with a price
    Price { monthly: f64, currency: String },
    /// Answer successfully but without a price
    NoPrice,
    /// Fail the RPC
    Fail { message: String },
    /// Sleep past any reasonable deadline, then answer without a price
    Hang { delay: Duration },
    /// Answer with a price after a delay that stays within the deadline
    SlowPrice { delay: Duration, monthly: f64, currency: String },
}

/// Scriptable in-memory cost source.
pub struct FakeSource {
    info: PluginInfo,
    outcomes: Mutex<HashMap<String, FakeOutcome>>,
    series: Mutex<HashMap<String, ActualCostSeries>>,
    recommendations: Mutex<Vec<Recommendation>>,
    budgets: Mutex<Vec<BudgetStatus>>,
    accept_dismissals: bool,
    cost_calls: AtomicUsize,
    dismiss_calls: AtomicUsize,
    last_recommendation_query: Mutex<Option<RecommendationQuery>>,
}

impl FakeSource {
    /// A fake advertising every feature for every provider.
    pub fn new(name: impl Into<String>) -> Self {
        let capabilities: HashSet<Feature> = [
            Feature::ProjectedCosts,
            Feature::ActualCosts,
            Feature::Recommendations,
            Feature::Budgets,
            Feature::EstimateCost,
            Feature::DismissRecommendations,
            Feature::PluginInfo,
        ]
        .into_iter()
        .collect();
        Self {
            info: PluginInfo {
                name: name.into(),
                version: "0.0.0-test".to_string(),
                providers: vec!["*".to_string()],
                capabilities,
                protocol_version: 1,
            },
            outcomes: Mutex::new(HashMap::new()),
            series: Mutex::new(HashMap::new()),
            recommendations: Mutex::new(Vec::new()),
            budgets: Mutex::new(Vec::new()),
            accept_dismissals: true,
            cost_calls: AtomicUsize::new(0),
            dismiss_calls: AtomicUsize::new(0),
            last_recommendation_query: Mutex::new(None),
        }
    }

    /// Restrict the advertised feature set.
    pub fn with_features(mut self, features: &[Feature]) -> Self {
        self.info.capabilities = features.iter().copied().collect();
        self
    }

    /// Restrict the advertised provider prefixes.
    pub fn with_providers(mut self, providers: &[&str]) -> Self {
        self.info.providers = providers.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Script a priced answer for one resource id.
    pub fn price(self, resource_id: &str, monthly: f64, currency: &str) -> Self {
        self.outcome(resource_id, FakeOutcome::Price {
            monthly,
            currency: currency.to_string(),
        })
    }

    /// Script a data-free success for one resource id.
    pub fn no_price(self, resource_id: &str) -> Self {
        self.outcome(resource_id, FakeOutcome::NoPrice)
    }

    /// Script an RPC failure for one resource id.
    pub fn fail(self, resource_id: &str, message: &str) -> Self {
        self.outcome(resource_id, FakeOutcome::Fail { message: message.to_string() })
    }

    /// Script a hang for one resource id.
    pub fn hang(self, resource_id: &str, delay: Duration) -> Self {
        self.outcome(resource_id, FakeOutcome::Hang { delay })
    }

    /// Script a delayed price for one resource id.
    pub fn slow_price(self, resource_id: &str, delay: Duration, monthly: f64, currency: &str) -> Self {
        self.outcome(resource_id, FakeOutcome::SlowPrice {
            delay,
            monthly,
            currency: currency.to_string(),
        })
    }

    fn outcome(self, resource_id: &str, outcome: FakeOutcome) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), outcome);
        self
    }

    /// Script the actual-cost series for one resource id.
    pub fn with_series(self, resource_id: &str, series: ActualCostSeries) -> Self {
        self.series
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), series);
        self
    }

    /// Script the recommendation list.
    pub fn with_recommendations(self, recommendations: Vec<Recommendation>) -> Self {
        *self.recommendations.lock().unwrap() = recommendations;
        self
    }

    /// Script the budget list.
    pub fn with_budgets(self, budgets: Vec<BudgetStatus>) -> Self {
        *self.budgets.lock().unwrap() = budgets;
        self
    }

    /// Make the fake refuse dismissals.
    pub fn rejecting_dismissals(mut self) -> Self {
        self.accept_dismissals = false;
        self
    }

    /// Number of projected/estimate cost RPCs the fake has served.
    pub fn cost_calls(&self) -> usize {
        self.cost_calls.load(Ordering::SeqCst)
    }

    /// Number of dismissal RPCs the fake has served.
    pub fn dismiss_calls(&self) -> usize {
        self.dismiss_calls.load(Ordering::SeqCst)
    }

    /// The last recommendation query the fake received.
    pub fn last_recommendation_query(&self) -> Option<RecommendationQuery> {
        self.last_recommendation_query.lock().unwrap().clone()
    }

    async fn answer(&self, resource_id: &str) -> Result<ProjectedCost, PluginError> {
        self.cost_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcomes.lock().unwrap().get(resource_id).cloned();
        match outcome {
            Some(FakeOutcome::Price { monthly, currency }) => Ok(ProjectedCost {
                monthly: Some(monthly),
                currency,
                notes: String::new(),
            }),
            Some(FakeOutcome::Fail { message }) => {
                Err(PluginError::Rpc { code: 1, message })
            }
            Some(FakeOutcome::Hang { delay }) => {
                tokio::time::sleep(delay).await;
                Ok(ProjectedCost::default())
            }
            Some(FakeOutcome::SlowPrice { delay, monthly, currency }) => {
                tokio::time::sleep(delay).await;
                Ok(ProjectedCost {
                    monthly: Some(monthly),
                    currency,
                    notes: String::new(),
                })
            }
            Some(FakeOutcome::NoPrice) | None => Ok(ProjectedCost::default()),
        }
    }
}

#[async_trait::async_trait]
impl CostSource for FakeSource {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn plugin_info(&self) -> &PluginInfo {
        &self.info
    }

    async fn projected_cost(&self, resource: &ResourceDescriptor) -> Result<ProjectedCost, PluginError> {
        self.answer(&resource.id).await
    }

    async fn actual_cost(
        &self,
        resource: &ResourceDescriptor,
        _window: UsageWindow,
        _granularity: UsageGranularity,
    ) -> Result<ActualCostSeries, PluginError> {
        // Scripted hard failures apply to the actual-cost surface too.
        if let Some(FakeOutcome::Fail { message }) =
            self.outcomes.lock().unwrap().get(&resource.id).cloned()
        {
            return Err(PluginError::Rpc { code: 1, message });
        }
        Ok(self
            .series
            .lock()
            .unwrap()
            .get(&resource.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn recommendations(&self, query: &RecommendationQuery) -> Result<Vec<Recommendation>, PluginError> {
        *self.last_recommendation_query.lock().unwrap() = Some(query.clone());
        let excluded: HashSet<&String> = query.excluded_ids.iter().collect();
        Ok(self
            .recommendations
            .lock()
            .unwrap()
            .iter()
            .filter(|rec| !excluded.contains(&rec.id))
            .cloned()
            .collect())
    }

    async fn budgets(&self, _filter: &BudgetFilter) -> Result<Vec<BudgetStatus>, PluginError> {
        Ok(self.budgets.lock().unwrap().clone())
    }

    async fn estimate_cost(
        &self,
        resource: &ResourceDescriptor,
        _overrides: &EstimateOverrides,
    ) -> Result<ProjectedCost, PluginError> {
        self.answer(&resource.id).await
    }

    async fn dismiss_recommendation(&self, _request: &DismissRequest) -> Result<DismissResponse, PluginError> {
        self.dismiss_calls.fetch_add(1, Ordering::SeqCst);
        Ok(DismissResponse {
            accepted: self.accept_dismissals,
            message: if self.accept_dismissals {
                "recorded".to_string()
            } else {
                "dismissals not supported upstream".to_string()
            },
        })
    }
}
