//! Blast-radius analysis over the reverse dependency graph.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::graph::SystemGraph;
use crate::health::{round2, HealthStatus};
use crate::registry::Tier;

/// A system transitively depending on at least one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impacted {
    pub system_id: String,
    pub distance: u32,
    pub tier: Tier,
}

/// Sources plus everything downstream of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImpactResult {
    pub sources: Vec<String>,
    pub impacted: Vec<Impacted>,
}

/// Breadth-first walk over `dependents` from every source at once, keeping
/// the minimal hop distance.
///
/// Sources themselves never appear as impacted. Ordered by tier severity
/// (prod first), then distance, then `system_id`.
pub fn compute_impact<S: AsRef<str>>(graph: &SystemGraph, sources: &[S]) -> ImpactResult {
    let src: BTreeSet<String> = sources
        .iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let mut dist: BTreeMap<String, u32> = BTreeMap::new();
    let mut queue: VecDeque<(String, u32)> = src.iter().map(|s| (s.clone(), 0)).collect();

    while let Some((node, d)) = queue.pop_front() {
        for dep in graph.dependents(&node) {
            let nd = d + 1;
            let shorter = dist.get(dep).map_or(true, |prev| nd < *prev);
            if shorter {
                dist.insert(dep.clone(), nd);
                queue.push_back((dep.clone(), nd));
            }
        }
    }

    for s in &src {
        dist.remove(s);
    }

    let mut impacted: Vec<Impacted> = dist
        .into_iter()
        .map(|(system_id, distance)| Impacted {
            tier: graph.tier(&system_id),
            system_id,
            distance,
        })
        .collect();
    impacted.sort_by(|a, b| {
        b.tier
            .impact_weight()
            .cmp(&a.tier.impact_weight())
            .then_with(|| a.distance.cmp(&b.distance))
            .then_with(|| a.system_id.cmp(&b.system_id))
    });

    ImpactResult {
        sources: src.into_iter().collect(),
        impacted,
    }
}

/// Pick impact sources: non-sample systems that are red or yellow, plus the
/// contributors of a HIGH drift drop. Sorted and deduplicated.
pub fn select_sources<'a, I, D>(rows: I, drift_sources: D) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, bool, HealthStatus)>,
    D: IntoIterator<Item = &'a str>,
{
    let mut src: BTreeSet<String> = BTreeSet::new();
    for (system_id, is_sample, status) in rows {
        if is_sample || system_id.is_empty() {
            continue;
        }
        if matches!(status, HealthStatus::Red | HealthStatus::Yellow) {
            src.insert(system_id.to_string());
        }
    }
    for sid in drift_sources {
        let sid = sid.trim();
        if !sid.is_empty() {
            src.insert(sid.to_string());
        }
    }
    src.into_iter().collect()
}

/// Per-source risk row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRow {
    pub system_id: String,
    pub tier: Tier,
    pub dependents_count: usize,
    pub avg_distance: f64,
    pub risk_score: f64,
    pub impacted: Vec<Impacted>,
}

/// Rank sources by blast radius. Rank 1 (index 0) carries the highest risk.
pub fn rank_risk(graph: &SystemGraph, sources: &[String]) -> Vec<RiskRow> {
    let unique: BTreeSet<&String> = sources.iter().collect();
    let mut rows: Vec<RiskRow> = unique
        .into_iter()
        .map(|source| {
            let tier = graph.tier(source);
            let impacted = compute_impact(graph, std::slice::from_ref(source)).impacted;
            let dependents_count = impacted.len();
            let avg_distance = if dependents_count == 0 {
                0.0
            } else {
                impacted.iter().map(|i| f64::from(i.distance)).sum::<f64>()
                    / dependents_count as f64
            };
            let distance_weight = if dependents_count == 0 {
                1.0
            } else {
                1.0 + 1.0 / (1.0 + avg_distance)
            };
            let risk_score =
                round2(tier.risk_weight() * (1.0 + dependents_count as f64) * distance_weight);
            RiskRow {
                system_id: source.clone(),
                tier,
                dependents_count,
                avg_distance: round2(avg_distance),
                risk_score,
                impacted,
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        b.risk_score
            .total_cmp(&a.risk_score)
            .then_with(|| a.system_id.cmp(&b.system_id))
    });
    rows
}

/// One-line summary, e.g. `Impact: core → api (1 hop), web (2 hops)`.
pub fn render_impact_line(result: &ImpactResult) -> Option<String> {
    if result.sources.is_empty() || result.impacted.is_empty() {
        return None;
    }
    Some(format!(
        "Impact: {} → {}",
        result.sources.join(", "),
        describe_impacted(&result.impacted)
    ))
}

/// First three impacted systems with hop counts, plus an overflow count.
pub fn describe_impacted(impacted: &[Impacted]) -> String {
    let parts: Vec<String> = impacted
        .iter()
        .take(3)
        .map(|it| {
            let hop = if it.distance == 1 { "hop" } else { "hops" };
            format!("{} ({} {})", it.system_id, it.distance, hop)
        })
        .collect();
    let more = if impacted.len() > 3 {
        format!(", +{} more", impacted.len() - 3)
    } else {
        String::new()
    };
    format!("{}{}", parts.join(", "), more)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::System;

    fn system(id: &str, deps: &[&str], tier: Tier) -> System {
        System {
            system_id: id.to_string(),
            contracts_glob: "c".to_string(),
            events_glob: "e".to_string(),
            is_sample: tier == Tier::Sample,
            notes: None,
            tier,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            owners: vec![],
        }
    }

    fn fan_out() -> SystemGraph {
        SystemGraph::from_systems(&[
            system("core", &[], Tier::Prod),
            system("api", &["core"], Tier::Prod),
            system("web", &["api"], Tier::Prod),
            system("stage", &["core"], Tier::Staging),
            system("tool", &["core"], Tier::Dev),
            system("demo", &["core"], Tier::Sample),
        ])
    }

    #[test]
    fn test_impact_orders_by_tier_then_distance() {
        let result = compute_impact(&fan_out(), &["core"]);
        let ids: Vec<&str> = result.impacted.iter().map(|i| i.system_id.as_str()).collect();
        assert_eq!(ids, vec!["api", "web", "stage", "tool", "demo"]);
        assert_eq!(result.impacted[1].distance, 2);
    }

    #[test]
    fn test_sources_excluded_and_min_distance_kept() {
        let result = compute_impact(&fan_out(), &["api", "core"]);
        assert!(result.impacted.iter().all(|i| i.system_id != "api"));
        let web = result
            .impacted
            .iter()
            .find(|i| i.system_id == "web")
            .expect("web impacted");
        assert_eq!(web.distance, 1);
        assert_eq!(result.sources, vec!["api", "core"]);
    }

    #[test]
    fn test_no_sources_no_impact() {
        let result = compute_impact::<&str>(&fan_out(), &[]);
        assert!(result.impacted.is_empty());
        assert!(render_impact_line(&result).is_none());
    }

    #[test]
    fn test_select_sources_skips_samples_and_green() {
        let rows = vec![
            ("a", false, HealthStatus::Red),
            ("b", false, HealthStatus::Yellow),
            ("c", false, HealthStatus::Green),
            ("d", true, HealthStatus::Red),
        ];
        assert_eq!(select_sources(rows, ["e", " "]), vec!["a", "b", "e"]);
    }

    #[test]
    fn test_risk_score_formula() {
        let rows = rank_risk(&fan_out(), &["core".to_string(), "api".to_string()]);
        // core: 4 * (1 + 5) * (1 + 1/(1 + 1.2)) = 34.909...
        assert_eq!(rows[0].system_id, "core");
        assert_eq!(rows[0].dependents_count, 5);
        assert_eq!(rows[0].avg_distance, 1.2);
        assert_eq!(rows[0].risk_score, 34.91);
        // api: 4 * 2 * 1.5 = 12
        assert_eq!(rows[1].risk_score, 12.0);
    }

    #[test]
    fn test_risk_leaf_source_has_unit_distance_weight() {
        let rows = rank_risk(&fan_out(), &["tool".to_string()]);
        assert_eq!(rows[0].risk_score, 2.0);
        assert_eq!(rows[0].avg_distance, 0.0);
    }

    #[test]
    fn test_render_impact_line_truncates() {
        let result = compute_impact(&fan_out(), &["core"]);
        assert_eq!(
            render_impact_line(&result).as_deref(),
            Some("Impact: core → api (1 hop), web (2 hops), stage (1 hop), +2 more")
        );
    }
}
