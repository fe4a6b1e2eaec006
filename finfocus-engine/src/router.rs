//! # Routing Engine
//!
//! Selects which plugins answer a given `(resource, feature)` query.
//! Configuration is an ordered list of rules; each rule pairs a shell-style
//! glob over the resource type with an optional region filter and an ordered
//! list of plugin targets carrying `{priority, fallback}`.
//!
//! ## Matching
//!
//! 1. Rules are evaluated in configured order, explicit patterns before the
//!    catch-all `*`. A rule matches when its pattern matches the resource
//!    type, its region filter is absent or equal to the resource's region,
//!    and it lists at least one plugin advertising the requested feature.
//!    A resource without a region never matches a region-filtered rule.
//! 2. Matching rules expand to a flat match list in rule order, then by
//!    priority (higher first) within each rule.
//! 3. An empty result with no global default means routing is unconfigured
//!    for this resource; the engine then queries every installed plugin
//!    advertising the feature, preserving the unrouted baseline behavior.
//!
//! Invalid glob patterns are dropped with a warning at construction time,
//! never a failure at query time. The router is immutable once built, so
//! match results are stable across calls for the same inputs.

use finfocus_plugin_sdk::client::CostSource;
use finfocus_plugin_sdk::models::{Feature, ResourceDescriptor};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// One plugin target inside a routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTarget {
    /// Plugin name the rule routes to
    pub plugin: String,
    /// Higher priorities are tried first within the rule
    #[serde(default)]
    pub priority: i32,
    /// Whether failure of this target lets the engine try the next match
    #[serde(default)]
    pub fallback: bool,
}

/// One configured routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Shell-style glob over the resource type, e.g. `aws:ec2:*`
    pub pattern: String,
    /// Region the rule is restricted to, when any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Plugin targets in configured order
    #[serde(default)]
    pub targets: Vec<RouteTarget>,
}

/// Full routing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Ordered rules
    #[serde(default)]
    pub rules: Vec<RouteRule>,
    /// Plugin used when no rule matches, when configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_plugin: Option<String>,
}

/// Why a match was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    /// Unrouted fallback: every plugin advertising the feature
    Automatic,
    /// A configured pattern rule matched
    Pattern,
    /// The configured global default applied
    Global,
}

/// Where a match came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Automatic,
    Config,
}

/// One routed `(resource, feature) → plugin` pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMatch {
    /// Plugin name to dispatch to
    pub plugin: String,
    /// Priority the match was ordered by
    pub priority: i32,
    /// Whether the engine may try the next match on failure
    pub fallback: bool,
    /// Why this match exists
    pub reason: MatchReason,
    /// Whether it came from configuration or the automatic fallback
    pub source: MatchSource,
}

struct CompiledRule {
    matcher: GlobMatcher,
    explicit: bool,
    region: Option<String>,
    targets: Vec<RouteTarget>,
}

/// Immutable routing table compiled from a [`RoutingConfig`].
pub struct Router {
    rules: Vec<CompiledRule>,
    default_plugin: Option<String>,
}

impl Router {
    /// Compile a configuration. Invalid patterns are dropped with a WARN.
    pub fn new(config: RoutingConfig) -> Self {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in config.rules {
            let matcher = match Glob::new(&rule.pattern) {
                Ok(glob) => glob.compile_matcher(),
                Err(err) => {
                    warn!(pattern = %rule.pattern, error = %err, "dropping routing rule with invalid pattern");
                    continue;
                }
            };
            rules.push(CompiledRule {
                matcher,
                explicit: rule.pattern != "*",
                region: rule.region,
                targets: rule.targets,
            });
        }
        // Explicit patterns take precedence over the catch-all; the sort is
        // stable so configured order is preserved within each group.
        rules.sort_by_key(|rule| !rule.explicit);
        Self { rules, default_plugin: config.default_plugin }
    }

    /// Router with no configuration: every lookup falls through to the
    /// engine's all-plugins behavior.
    pub fn unconfigured() -> Self {
        Self::new(RoutingConfig::default())
    }

    /// Ordered matches for one resource and feature.
    ///
    /// `sources` maps plugin names to live sources; rules only yield
    /// plugins that are present and advertise the feature. Returns an
    /// empty list when routing is unconfigured for this resource.
    pub fn matches(
        &self,
        resource: &ResourceDescriptor,
        feature: Feature,
        sources: &HashMap<String, Arc<dyn CostSource>>,
    ) -> Vec<PluginMatch> {
        let mut matches: Vec<PluginMatch> = Vec::new();

        for rule in &self.rules {
            if !rule.matcher.is_match(&resource.resource_type) {
                continue;
            }
            if let Some(region) = &rule.region {
                // An absent or ambiguous resource region never satisfies a
                // region filter.
                match &resource.region {
                    Some(resource_region) if resource_region == region => {}
                    _ => continue,
                }
            }
            let mut targets: Vec<&RouteTarget> = rule
                .targets
                .iter()
                .filter(|target| {
                    sources
                        .get(&target.plugin)
                        .is_some_and(|source| source.supports(feature))
                })
                .collect();
            targets.sort_by(|a, b| b.priority.cmp(&a.priority));
            for target in targets {
                if matches.iter().any(|m| m.plugin == target.plugin) {
                    continue;
                }
                matches.push(PluginMatch {
                    plugin: target.plugin.clone(),
                    priority: target.priority,
                    fallback: target.fallback,
                    reason: MatchReason::Pattern,
                    source: MatchSource::Config,
                });
            }
        }

        if matches.is_empty() {
            if let Some(default_plugin) = &self.default_plugin {
                let advertises = sources
                    .get(default_plugin)
                    .is_some_and(|source| source.supports(feature));
                if advertises {
                    matches.push(PluginMatch {
                        plugin: default_plugin.clone(),
                        priority: 0,
                        fallback: false,
                        reason: MatchReason::Global,
                        source: MatchSource::Config,
                    });
                }
            }
        }

        matches
    }
}
