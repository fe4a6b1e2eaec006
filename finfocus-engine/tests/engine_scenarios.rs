//! End-to-end engine scenarios over in-memory cost sources: routing
//! fallback, pre-flight validation, cache write-through, budget exit
//! policy, and the recommendation dismissal lifecycle.

use chrono::{Duration as ChronoDuration, Utc};
use finfocus_engine::budget::BudgetFilterOptions;
use finfocus_engine::cache::QueryFingerprint;
use finfocus_engine::config::{BudgetExitPolicy, CacheSettings, Paths};
use finfocus_engine::dismissal::DismissalStore;
use finfocus_engine::engine::{Engine, RecommendationOptions, RecommendationState};
use finfocus_engine::router::{RouteRule, RouteTarget, RoutingConfig};
use finfocus_engine::testing::FakeSource;
use finfocus_plugin_sdk::client::CostSource;
use finfocus_plugin_sdk::models::{
    Budget, BudgetFilter, BudgetPeriod, BudgetStatus, DismissRequest, DismissalReason, ErrorCode,
    Recommendation, RecommendationAction, ResourceDescriptor,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn paths(dir: &tempfile::TempDir) -> Paths {
    Paths::new(dir.path())
}

fn no_cache(dir: &tempfile::TempDir) -> CacheSettings {
    CacheSettings::new(dir.path().join("cache")).disabled()
}

fn recommendation(id: &str, resource_id: &str, savings: f64) -> Recommendation {
    Recommendation {
        id: id.to_string(),
        resource_id: resource_id.to_string(),
        action: RecommendationAction::Rightsize,
        estimated_savings: savings,
        currency: "USD".to_string(),
        description: format!("rightsize {resource_id}"),
        provider: "aws".to_string(),
    }
}

fn budget_status(id: &str, amount: f64, spend: f64) -> BudgetStatus {
    BudgetStatus {
        budget: Budget {
            id: id.to_string(),
            name: format!("budget {id}"),
            amount,
            currency: "USD".to_string(),
            period: BudgetPeriod::Monthly,
            alerts: Vec::new(),
            provider: Some("aws".to_string()),
            region: None,
            resource_types: Vec::new(),
            metadata: HashMap::new(),
        },
        current_spend: spend,
        forecast_spend: None,
        health: None,
    }
}

// S1: primary plugin fails, the designated fallback answers, the row is
// clean.
#[tokio::test]
async fn fallback_match_rescues_a_failing_primary() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let primary = Arc::new(FakeSource::new("plugin-a").fail("i-1", "pricing backend down"));
    let secondary = Arc::new(FakeSource::new("plugin-b").price("i-1", 150.0, "USD"));

    let routing = RoutingConfig {
        rules: vec![RouteRule {
            pattern: "aws:ec2:*".to_string(),
            region: None,
            targets: vec![
                RouteTarget { plugin: "plugin-a".to_string(), priority: 10, fallback: false },
                RouteTarget { plugin: "plugin-b".to_string(), priority: 1, fallback: true },
            ],
        }],
        default_plugin: None,
    };
    let engine = Engine::builder()
        .with_paths(paths(&dir))
        .with_cache_settings(no_cache(&dir))
        .with_source(primary.clone())
        .with_source(secondary.clone())
        .with_routing(routing)
        .build()
        .unwrap();

    let resource = ResourceDescriptor::new("i-1", "aws:ec2:Instance");
    let rows = engine.projected_costs(std::slice::from_ref(&resource)).await;

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert!(row.error.is_none(), "fallback should have rescued the query: {:?}", row.error);
    assert_eq!(row.monthly, 150.0);
    assert_eq!(row.currency, "USD");
    assert_eq!(row.notes, "");
    assert_eq!(primary.cost_calls(), 1);
    assert_eq!(secondary.cost_calls(), 1);
}

// S2: a descriptor with an empty id is rejected before any RPC, and the
// notes never duplicate the structured error.
#[tokio::test]
async fn validation_failures_produce_clean_rows() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeSource::new("aws"));
    let engine = Engine::builder()
        .with_paths(paths(&dir))
        .with_cache_settings(no_cache(&dir))
        .with_source(fake.clone())
        .build()
        .unwrap();

    let resource = ResourceDescriptor::new("", "aws:ec2:Instance");
    let rows = engine.projected_costs(std::slice::from_ref(&resource)).await;

    let row = &rows[0];
    let error = row.error.as_ref().unwrap();
    assert_eq!(error.code, ErrorCode::ValidationError);
    assert_eq!(error.resource_type, "aws:ec2:Instance");
    assert!(!row.notes.contains("ERROR:"));
    assert!(!row.notes.contains("VALIDATION:"));
    assert!(row.notes.is_empty());
    assert_eq!(fake.cost_calls(), 0);
}

// S3: the first query writes a cache entry named by the key's sha-256; the
// second query is served without an RPC.
#[tokio::test]
async fn cache_write_through_short_circuits_the_second_query() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeSource::new("aws").price("db-1", 88.0, "USD"));
    let engine = Engine::builder()
        .with_paths(paths(&dir))
        .with_cache_settings(CacheSettings::new(dir.path().join("cache")))
        .with_source(fake.clone())
        .build()
        .unwrap();

    let resource = ResourceDescriptor::new("db-1", "aws:rds:Instance");
    let first = engine.projected_costs(std::slice::from_ref(&resource)).await;
    assert_eq!(first[0].monthly, 88.0);
    assert_eq!(fake.cost_calls(), 1);

    let key = QueryFingerprint::new("projected", &resource).key();
    assert!(key.starts_with("projected|aws|"));
    assert!(engine.cache().entry_path(&key).exists(), "write-through entry missing");

    let second = engine.projected_costs(std::slice::from_ref(&resource)).await;
    assert_eq!(second[0].monthly, 88.0);
    assert_eq!(fake.cost_calls(), 1, "cache hit must not start an RPC");
}

// S4: health summary counts and the exit-code policy.
#[tokio::test]
async fn budget_summary_and_exit_policy() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeSource::new("aws").with_budgets(vec![
        budget_status("ok", 100.0, 10.0),
        budget_status("warning", 100.0, 85.0),
        budget_status("exceeded", 100.0, 130.0),
    ]));
    let engine = Engine::builder()
        .with_paths(paths(&dir))
        .with_cache_settings(no_cache(&dir))
        .with_source(fake)
        .with_budget_exit_policy(BudgetExitPolicy { exit_on_threshold: true, exit_code: 2 })
        .build()
        .unwrap();

    let report = engine
        .budgets(&BudgetFilter::default(), &BudgetFilterOptions::default())
        .await;
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.ok, 1);
    assert_eq!(report.summary.warning, 1);
    assert_eq!(report.summary.exceeded, 1);

    let err = engine.evaluate_budget_exit(&report).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

// S5: a dismissed recommendation is excluded from plugin queries and from
// default output, and reappears annotated when dismissed rows are requested.
#[tokio::test]
async fn dismissal_suppresses_and_include_dismissed_restores() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeSource::new("aws").with_recommendations(vec![
        recommendation("R-7", "i-1", 40.0),
        recommendation("R-9", "i-2", 25.0),
    ]));
    let engine = Engine::builder()
        .with_paths(paths(&dir))
        .with_cache_settings(no_cache(&dir))
        .with_source(fake.clone())
        .build()
        .unwrap();

    let request = DismissRequest {
        id: "R-7".to_string(),
        reason: DismissalReason::BusinessConstraint,
        custom_reason: None,
        expires_at: None,
        dismissed_by: Some("cli".to_string()),
    };
    assert_ok!(
        engine
            .dismiss_recommendation(&request, Some(recommendation("R-7", "i-1", 40.0)))
            .await
    );

    let resources = vec![ResourceDescriptor::new("i-1", "aws:ec2:Instance")];
    let rows = engine
        .recommendations(&resources, RecommendationOptions::default())
        .await;

    let query = fake.last_recommendation_query().unwrap();
    assert_eq!(query.excluded_ids, vec!["R-7".to_string()]);
    assert!(rows.iter().all(|row| row.recommendation.id != "R-7"));
    assert!(rows.iter().any(|row| row.recommendation.id == "R-9"));

    let with_dismissed = engine
        .recommendations(&resources, RecommendationOptions {
            include_dismissed: true,
            ..Default::default()
        })
        .await;
    let dismissed_row = with_dismissed
        .iter()
        .find(|row| row.recommendation.id == "R-7")
        .expect("dismissed row should reappear");
    assert_eq!(dismissed_row.state, RecommendationState::Dismissed);
    assert_eq!(dismissed_row.recommendation.estimated_savings, 40.0);
    assert_eq!(dismissed_row.recommendation.description, "rightsize i-1");
}

// S6: an expired snooze clears on the next read and the recommendation is
// active again.
#[tokio::test]
async fn expired_snoozes_clear_on_the_next_read() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(
        FakeSource::new("aws").with_recommendations(vec![recommendation("R-8", "i-1", 15.0)]),
    );
    let engine = Engine::builder()
        .with_paths(paths(&dir))
        .with_cache_settings(no_cache(&dir))
        .with_source(fake)
        .build()
        .unwrap();

    let past = Utc::now() - ChronoDuration::minutes(10);
    engine
        .dismiss_recommendation(
            &DismissRequest {
                id: "R-8".to_string(),
                reason: DismissalReason::Deferred,
                custom_reason: None,
                expires_at: Some(past),
                dismissed_by: None,
            },
            None,
        )
        .await
        .unwrap();

    {
        let store = DismissalStore::open(dir.path().join("dismissed.json"), None);
        assert_eq!(store.expired_snoozes(Utc::now()), vec!["R-8".to_string()]);
    }

    let resources = vec![ResourceDescriptor::new("i-1", "aws:ec2:Instance")];
    let rows = engine
        .recommendations(&resources, RecommendationOptions::default())
        .await;
    assert!(
        rows.iter().any(|row| row.recommendation.id == "R-8"
            && row.state == RecommendationState::Active),
        "expired snooze should be active again"
    );

    let store = DismissalStore::open(dir.path().join("dismissed.json"), None);
    assert!(store.expired_snoozes(Utc::now()).is_empty());
    assert!(store.get("R-8").is_none());
}

// Actual costs: a populated series from the plugin becomes a clean row,
// an empty series classifies as NO_COST_DATA.
#[tokio::test]
async fn actual_costs_distinguish_data_from_no_data() {
    use finfocus_plugin_sdk::models::{
        ActualCostPoint, ActualCostSeries, UsageGranularity, UsageWindow,
    };

    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let to = Utc::now();
    let from = to - ChronoDuration::days(7);
    let series = ActualCostSeries {
        points: vec![ActualCostPoint {
            amount: 12.5,
            period_start: from,
            period_end: to,
        }],
        currency: "USD".to_string(),
    };
    let fake = Arc::new(FakeSource::new("aws").with_series("i-1", series));
    let engine = Engine::builder()
        .with_paths(paths(&dir))
        .with_cache_settings(no_cache(&dir))
        .with_source(fake)
        .build()
        .unwrap();

    let resources = vec![
        ResourceDescriptor::new("i-1", "aws:ec2:Instance"),
        ResourceDescriptor::new("i-2", "aws:ec2:Instance"),
    ];
    let window = UsageWindow { from, to };
    let rows = engine
        .actual_costs(&resources, window, UsageGranularity::Daily)
        .await;

    assert_eq!(rows.len(), 2);
    assert!(rows[0].error.is_none());
    assert_eq!(rows[0].points.len(), 1);
    assert_eq!(rows[0].points[0].amount, 12.5);
    assert_eq!(rows[1].error.as_ref().unwrap().code, ErrorCode::NoCostData);
}

// Property 1: output order equals input order regardless of completion
// order.
#[tokio::test]
async fn output_order_is_input_order_despite_completion_order() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    // Later inputs complete earlier.
    let fake = Arc::new(
        FakeSource::new("aws")
            .slow_price("r-0", Duration::from_millis(120), 1.0, "USD")
            .slow_price("r-1", Duration::from_millis(90), 2.0, "USD")
            .slow_price("r-2", Duration::from_millis(60), 3.0, "USD")
            .slow_price("r-3", Duration::from_millis(30), 4.0, "USD")
            .slow_price("r-4", Duration::from_millis(1), 5.0, "USD"),
    );
    let engine = Engine::builder()
        .with_paths(paths(&dir))
        .with_cache_settings(no_cache(&dir))
        .with_source(fake)
        .with_concurrency(8)
        .build()
        .unwrap();

    let resources: Vec<ResourceDescriptor> = (0..5)
        .map(|i| ResourceDescriptor::new(format!("r-{i}"), "aws:ec2:Instance"))
        .collect();
    let rows = engine.projected_costs(&resources).await;

    let ids: Vec<&str> = rows.iter().map(|row| row.resource_id.as_str()).collect();
    assert_eq!(ids, vec!["r-0", "r-1", "r-2", "r-3", "r-4"]);
    assert_eq!(rows[0].monthly, 1.0);
    assert_eq!(rows[4].monthly, 5.0);
}

// Property 8: with no routing configuration and no dismissal file the
// engine behaves exactly like the query-all-plugins baseline.
#[tokio::test]
async fn unrouted_engine_matches_the_all_plugins_baseline() {
    init_tracing();
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let build = |dir: &tempfile::TempDir, routing: Option<RoutingConfig>| {
        let first: Arc<dyn CostSource> = Arc::new(FakeSource::new("first").price("i-1", 10.0, "USD"));
        let second: Arc<dyn CostSource> = Arc::new(FakeSource::new("second").price("i-1", 99.0, "USD"));
        let mut builder = Engine::builder()
            .with_paths(Paths::new(dir.path()))
            .with_cache_settings(CacheSettings::new(dir.path().join("cache")).disabled())
            .with_source(first)
            .with_source(second);
        if let Some(routing) = routing {
            builder = builder.with_routing(routing);
        }
        builder.build().unwrap()
    };

    let unrouted = build(&dir_a, None);
    let empty_config = build(&dir_b, Some(RoutingConfig::default()));

    let resources = vec![
        ResourceDescriptor::new("i-1", "aws:ec2:Instance"),
        ResourceDescriptor::new("", "aws:ec2:Instance"),
    ];
    let rows_a = unrouted.projected_costs(&resources).await;
    let rows_b = empty_config.projected_costs(&resources).await;

    assert_eq!(rows_a, rows_b);
    // First registered source answers first in the automatic chain.
    assert_eq!(rows_a[0].monthly, 10.0);
    assert_eq!(
        rows_a[1].error.as_ref().unwrap().code,
        ErrorCode::ValidationError
    );
}

// A hard failure from a non-fallback match ends the chain even when more
// plugins could answer.
#[tokio::test]
async fn non_fallback_failure_ends_the_chain() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let primary = Arc::new(FakeSource::new("plugin-a").fail("i-1", "boom"));
    let secondary = Arc::new(FakeSource::new("plugin-b").price("i-1", 150.0, "USD"));

    let routing = RoutingConfig {
        rules: vec![RouteRule {
            pattern: "aws:ec2:*".to_string(),
            region: None,
            targets: vec![
                RouteTarget { plugin: "plugin-a".to_string(), priority: 10, fallback: false },
                RouteTarget { plugin: "plugin-b".to_string(), priority: 1, fallback: false },
            ],
        }],
        default_plugin: None,
    };
    let engine = Engine::builder()
        .with_paths(paths(&dir))
        .with_cache_settings(no_cache(&dir))
        .with_source(primary)
        .with_source(secondary.clone())
        .with_routing(routing)
        .build()
        .unwrap();

    let resource = ResourceDescriptor::new("i-1", "aws:ec2:Instance");
    let rows = engine.projected_costs(std::slice::from_ref(&resource)).await;

    assert_eq!(rows[0].error.as_ref().unwrap().code, ErrorCode::PluginError);
    assert_eq!(secondary.cost_calls(), 0, "chain must stop at the non-fallback failure");
}
