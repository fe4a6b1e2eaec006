//! # Budget Evaluator
//!
//! Filter-then-classify over the budget statuses plugins return.
//!
//! Filtering merges provider/region/resource-type disjunctions with a tag
//! conjunction: a budget passes when it matches *any* configured provider
//! (case-insensitive), *any* region, *any* resource type, and *every*
//! configured tag, where tag values support shell globs via `*`. A missing
//! tag key excludes the budget. Currency codes must match `^[A-Z]{3}$`;
//! violations are filtered out with a WARN rather than failing evaluation.
//!
//! Classification buckets spend-vs-amount percentages: OK below 80,
//! WARNING 80–89, CRITICAL 90–99, EXCEEDED at or above 100. The summary
//! counts health buckets across all currencies; budgets whose health cannot
//! be derived count only toward the total and are logged.

use crate::config::BudgetExitPolicy;
use crate::error::EngineError;
use finfocus_plugin_sdk::models::{Budget, BudgetHealth, BudgetStatus, BudgetSummary};
use globset::Glob;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Host-side filter applied to collected budgets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetFilterOptions {
    /// Providers to keep (OR, case-insensitive)
    #[serde(default)]
    pub providers: Vec<String>,
    /// Regions to keep (OR)
    #[serde(default)]
    pub regions: Vec<String>,
    /// Resource types to keep (OR)
    #[serde(default)]
    pub resource_types: Vec<String>,
    /// Tags that must all match (AND, case-sensitive, glob values)
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl BudgetFilterOptions {
    /// Whether the filter keeps everything.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
            && self.regions.is_empty()
            && self.resource_types.is_empty()
            && self.tags.is_empty()
    }

    fn matches(&self, budget: &Budget) -> bool {
        if !self.providers.is_empty() {
            let matched = budget.provider.as_ref().is_some_and(|provider| {
                self.providers
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(provider))
            });
            if !matched {
                return false;
            }
        }
        if !self.regions.is_empty() {
            let matched = budget
                .region
                .as_ref()
                .is_some_and(|region| self.regions.iter().any(|wanted| wanted == region));
            if !matched {
                return false;
            }
        }
        if !self.resource_types.is_empty() {
            let matched = budget
                .resource_types
                .iter()
                .any(|budget_type| self.resource_types.iter().any(|wanted| wanted == budget_type));
            if !matched {
                return false;
            }
        }
        for (key, pattern) in &self.tags {
            let Some(value) = budget.metadata.get(key) else {
                return false;
            };
            if !tag_value_matches(pattern, value) {
                return false;
            }
        }
        true
    }
}

/// Glob match for one tag value; an invalid pattern degrades to literal
/// equality with a WARN.
fn tag_value_matches(pattern: &str, value: &str) -> bool {
    match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(value),
        Err(err) => {
            warn!(pattern, error = %err, "invalid tag glob, falling back to literal comparison");
            pattern == value
        }
    }
}

fn valid_currency(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Apply the filter, dropping budgets with malformed currency codes.
pub fn filter(statuses: Vec<BudgetStatus>, options: &BudgetFilterOptions) -> Vec<BudgetStatus> {
    statuses
        .into_iter()
        .filter(|status| {
            if !valid_currency(&status.budget.currency) {
                warn!(
                    budget = %status.budget.id,
                    currency = %status.budget.currency,
                    "budget has a malformed currency code, excluding"
                );
                return false;
            }
            options.matches(&status.budget)
        })
        .collect()
}

/// Health of one status: the plugin's classification when present,
/// otherwise derived from spend vs amount. `None` when neither is possible.
pub fn classify(status: &BudgetStatus) -> Option<BudgetHealth> {
    if let Some(health) = status.health {
        return Some(health);
    }
    if status.budget.amount <= 0.0 {
        return None;
    }
    let percent = status.current_spend / status.budget.amount * 100.0;
    Some(if percent >= 100.0 {
        BudgetHealth::Exceeded
    } else if percent >= 90.0 {
        BudgetHealth::Critical
    } else if percent >= 80.0 {
        BudgetHealth::Warning
    } else {
        BudgetHealth::Ok
    })
}

/// Aggregate health counts across all currencies.
pub fn summarize(statuses: &[BudgetStatus]) -> BudgetSummary {
    let mut summary = BudgetSummary { total: statuses.len(), ..Default::default() };
    for status in statuses {
        match classify(status) {
            Some(BudgetHealth::Ok) => summary.ok += 1,
            Some(BudgetHealth::Warning) => summary.warning += 1,
            Some(BudgetHealth::Critical) => summary.critical += 1,
            Some(BudgetHealth::Exceeded) => summary.exceeded += 1,
            None => {
                warn!(budget = %status.budget.id, "budget health unspecified, counting toward total only");
            }
        }
    }
    summary
}

/// Evaluate the exit-code policy over classified budgets.
///
/// Produces the typed budget-exit error iff the policy asks for it, at
/// least one budget is EXCEEDED, and the configured code is non-zero. A
/// zero code disables exit signaling even when budgets are exceeded.
pub fn evaluate_exit(policy: BudgetExitPolicy, statuses: &[BudgetStatus]) -> Result<(), EngineError> {
    if !policy.exit_on_threshold || policy.exit_code == 0 {
        return Ok(());
    }
    let exceeded = statuses
        .iter()
        .any(|status| classify(status) == Some(BudgetHealth::Exceeded));
    if exceeded {
        return Err(EngineError::BudgetExit { code: policy.exit_code });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use finfocus_plugin_sdk::models::BudgetPeriod;
    use std::collections::HashMap;

    fn budget(id: &str, amount: f64, currency: &str) -> Budget {
        Budget {
            id: id.to_string(),
            name: format!("budget {id}"),
            amount,
            currency: currency.to_string(),
            period: BudgetPeriod::Monthly,
            alerts: Vec::new(),
            provider: None,
            region: None,
            resource_types: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    fn status(id: &str, amount: f64, spend: f64) -> BudgetStatus {
        BudgetStatus {
            budget: budget(id, amount, "USD"),
            current_spend: spend,
            forecast_spend: None,
            health: None,
        }
    }

    #[test]
    fn classification_buckets_by_percent() {
        assert_eq!(classify(&status("b", 100.0, 10.0)), Some(BudgetHealth::Ok));
        assert_eq!(classify(&status("b", 100.0, 79.9)), Some(BudgetHealth::Ok));
        assert_eq!(classify(&status("b", 100.0, 80.0)), Some(BudgetHealth::Warning));
        assert_eq!(classify(&status("b", 100.0, 89.9)), Some(BudgetHealth::Warning));
        assert_eq!(classify(&status("b", 100.0, 90.0)), Some(BudgetHealth::Critical));
        assert_eq!(classify(&status("b", 100.0, 100.0)), Some(BudgetHealth::Exceeded));
        assert_eq!(classify(&status("b", 100.0, 250.0)), Some(BudgetHealth::Exceeded));
    }

    #[test]
    fn plugin_provided_health_wins() {
        let mut s = status("b", 100.0, 10.0);
        s.health = Some(BudgetHealth::Critical);
        assert_eq!(classify(&s), Some(BudgetHealth::Critical));
    }

    #[test]
    fn zero_amount_budgets_have_no_health() {
        assert_eq!(classify(&status("b", 0.0, 10.0)), None);
        let summary = summarize(&[status("b", 0.0, 10.0)]);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.ok + summary.warning + summary.critical + summary.exceeded, 0);
    }

    #[test]
    fn summary_counts_each_bucket() {
        let statuses = vec![
            status("ok", 100.0, 10.0),
            status("warn", 100.0, 85.0),
            status("over", 100.0, 120.0),
        ];
        let summary = summarize(&statuses);
        assert_eq!(summary, BudgetSummary { total: 3, ok: 1, warning: 1, critical: 0, exceeded: 1 });
    }

    #[test]
    fn provider_filter_is_case_insensitive_or() {
        let mut aws = status("aws", 100.0, 10.0);
        aws.budget.provider = Some("AWS".to_string());
        let mut gcp = status("gcp", 100.0, 10.0);
        gcp.budget.provider = Some("gcp".to_string());
        let unscoped = status("none", 100.0, 10.0);

        let options = BudgetFilterOptions {
            providers: vec!["aws".to_string(), "azure".to_string()],
            ..Default::default()
        };
        let kept = filter(vec![aws, gcp, unscoped], &options);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].budget.id, "aws");
    }

    #[test]
    fn tag_filter_is_a_conjunction_with_globs() {
        let mut status_a = status("a", 100.0, 10.0);
        status_a.budget.metadata.insert("team".into(), "platform-core".into());
        status_a.budget.metadata.insert("env".into(), "prod".into());
        let mut status_b = status("b", 100.0, 10.0);
        status_b.budget.metadata.insert("team".into(), "platform-core".into());
        // env key missing on b.

        let mut tags = BTreeMap::new();
        tags.insert("team".to_string(), "platform-*".to_string());
        tags.insert("env".to_string(), "prod".to_string());
        let options = BudgetFilterOptions { tags, ..Default::default() };

        let kept = filter(vec![status_a, status_b], &options);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].budget.id, "a");
    }

    #[test]
    fn tag_values_are_case_sensitive() {
        let mut s = status("a", 100.0, 10.0);
        s.budget.metadata.insert("env".into(), "Prod".into());
        let mut tags = BTreeMap::new();
        tags.insert("env".to_string(), "prod".to_string());
        let options = BudgetFilterOptions { tags, ..Default::default() };
        assert!(filter(vec![s], &options).is_empty());
    }

    #[test]
    fn malformed_currencies_are_filtered_out() {
        let mut bad = status("bad", 100.0, 10.0);
        bad.budget.currency = "usd".to_string();
        let mut worse = status("worse", 100.0, 10.0);
        worse.budget.currency = "DOLLARS".to_string();
        let good = status("good", 100.0, 10.0);

        let kept = filter(vec![bad, worse, good], &BudgetFilterOptions::default());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].budget.id, "good");
    }

    #[test]
    fn exit_policy_produces_the_typed_error() {
        let statuses = vec![status("over", 100.0, 150.0)];
        let policy = BudgetExitPolicy { exit_on_threshold: true, exit_code: 2 };
        let err = evaluate_exit(policy, &statuses).unwrap_err();
        assert!(matches!(err, EngineError::BudgetExit { code: 2 }));
    }

    #[test]
    fn exit_code_zero_disables_signaling() {
        let statuses = vec![status("over", 100.0, 150.0)];
        let policy = BudgetExitPolicy { exit_on_threshold: true, exit_code: 0 };
        assert!(evaluate_exit(policy, &statuses).is_ok());
    }

    #[test]
    fn no_exit_without_an_exceeded_budget() {
        let statuses = vec![status("warn", 100.0, 85.0)];
        let policy = BudgetExitPolicy { exit_on_threshold: true, exit_code: 2 };
        assert!(evaluate_exit(policy, &statuses).is_ok());
    }
}
