//! Advisory action hints.
//!
//! Hints never influence gating. They are derived from the same evaluation
//! rows the gate sees and ordered by `(severity, title)`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::drift::{DriftSeverity, DriftSummary};
use crate::evaluate::SystemRow;
use crate::graph::SystemGraph;
use crate::health::{HealthStatus, ViolationCode};
use crate::impact::{compute_impact, describe_impacted, RiskRow};
use crate::sla::SlaStatus;

const MAX_VIOLATION_HINTS: usize = 2;
const MAX_SLA_HINTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintSeverity {
    High,
    Med,
    Low,
}

impl HintSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            HintSeverity::High => "high",
            HintSeverity::Med => "med",
            HintSeverity::Low => "low",
        }
    }
}

impl From<DriftSeverity> for HintSeverity {
    fn from(value: DriftSeverity) -> Self {
        match value {
            DriftSeverity::High => HintSeverity::High,
            DriftSeverity::Med => HintSeverity::Med,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    pub severity: HintSeverity,
    pub title: String,
    pub why: String,
    pub fix: String,
    pub systems: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owners: Vec<String>,
}

struct Template {
    title: &'static str,
    why: &'static str,
    fix: &'static str,
}

fn template(code: ViolationCode) -> Template {
    match code {
        ViolationCode::PrimitivesMin => Template {
            title: "System contract missing minimum primitives",
            why: "Contract must declare >=3 primitives_used to stay enforceable.",
            fix: "Edit the system contract JSON and set primitives_used to at least 3 items \
                  (e.g., [\"P0\",\"P1\",\"P7\"]). Re-run: steward health --all --strict",
        },
        ViolationCode::InvariantsMin => Template {
            title: "System contract missing minimum invariants",
            why: "Contract must reference >=3 invariant IDs to define what must remain true.",
            fix: "Edit the system contract JSON and set invariants to at least 3 IDs \
                  (e.g., [\"INV-001\",\"INV-002\",\"INV-003\"]). Re-run: steward health --all --strict",
        },
        ViolationCode::EventsRecent => Template {
            title: "System is stale (no recent events)",
            why: "Systems must emit events within 14 days to prove they're alive.",
            fix: "Emit a status event for the system (or run it), then re-run strict.",
        },
    }
}

/// Hints for the most frequent violations among red non-sample systems, or a
/// single low-severity all-clear.
fn violation_hints(rows: &[SystemRow]) -> Vec<Hint> {
    let mut freq: BTreeMap<ViolationCode, usize> = BTreeMap::new();
    let mut affected: BTreeMap<ViolationCode, BTreeSet<String>> = BTreeMap::new();
    let red = rows
        .iter()
        .filter(|r| !r.is_sample && r.status == HealthStatus::Red);
    for row in red {
        for code in &row.violations {
            *freq.entry(*code).or_default() += 1;
            affected
                .entry(*code)
                .or_default()
                .insert(row.system_id.clone());
        }
    }

    if freq.is_empty() {
        return vec![Hint {
            severity: HintSeverity::Low,
            title: "No action required".to_string(),
            why: "All non-sample systems are healthy.".to_string(),
            fix: "Keep cadence: run `steward report health` daily.".to_string(),
            systems: Vec::new(),
            owners: Vec::new(),
        }];
    }

    let mut ranked: Vec<(ViolationCode, usize)> = freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(MAX_VIOLATION_HINTS)
        .map(|(code, _)| {
            let tpl = template(code);
            Hint {
                severity: HintSeverity::High,
                title: tpl.title.to_string(),
                why: tpl.why.to_string(),
                fix: tpl.fix.to_string(),
                systems: affected
                    .remove(&code)
                    .map(|s| s.into_iter().collect())
                    .unwrap_or_default(),
                owners: Vec::new(),
            }
        })
        .collect()
}

/// Escalations for non-sample systems in SLA breach (high) or without any
/// event (med).
fn sla_hints(rows: &[SystemRow]) -> Vec<Hint> {
    let mut flagged: Vec<&SystemRow> = rows
        .iter()
        .filter(|r| !r.is_sample && matches!(r.sla_status, SlaStatus::Breach | SlaStatus::Unknown))
        .collect();
    flagged.sort_by(|a, b| {
        a.sla_status
            .as_str()
            .cmp(b.sla_status.as_str())
            .then_with(|| a.system_id.cmp(&b.system_id))
    });
    flagged
        .into_iter()
        .take(MAX_SLA_HINTS)
        .map(|row| Hint {
            severity: if row.sla_status == SlaStatus::Breach {
                HintSeverity::High
            } else {
                HintSeverity::Med
            },
            title: "SLA escalation required".to_string(),
            why: format!(
                "{} is {} ({}d since last event, SLA max {}d).",
                row.system_id, row.sla_status, row.days_since_last_event, row.sla_max_days
            ),
            fix: row.escalation_hint.clone(),
            systems: vec![row.system_id.clone()],
            owners: row.owners.clone(),
        })
        .collect()
}

fn drift_hint(drift: &DriftSummary) -> Option<Hint> {
    let severity = drift.severity?;
    let (Some(latest), Some(before), Some(drop)) =
        (drift.latest_score, drift.score_24h_ago, drift.drop())
    else {
        return None;
    };
    let mut why = format!("Score dropped {drop} points vs 24h ago ({before} -> {latest}).");
    if !drift.contributors.is_empty() {
        let top: Vec<String> = drift
            .contributors
            .iter()
            .map(|c| format!("{} -{}", c.system_id, c.drop))
            .collect();
        why.push_str(&format!(" Top drift (24h): {}.", top.join(" | ")));
    }
    Some(Hint {
        severity: severity.into(),
        title: "Health drift detected".to_string(),
        why,
        fix: "Inspect recent violations and event recency. Run `steward report health` then \
              `steward health --all` to isolate the systems pulling the aggregate down."
            .to_string(),
        systems: drift
            .contributor_ids()
            .into_iter()
            .map(str::to_string)
            .collect(),
        owners: Vec::new(),
    })
}

fn blast_radius_hint(graph: &SystemGraph, risk: &[RiskRow]) -> Option<Hint> {
    let top = risk.first()?;
    let impacted: Vec<&str> = top
        .impacted
        .iter()
        .take(3)
        .map(|i| i.system_id.as_str())
        .collect();
    let impacted_txt = if impacted.is_empty() {
        "none".to_string()
    } else {
        impacted.join(",")
    };
    Some(Hint {
        severity: HintSeverity::Med,
        title: "Prioritize highest blast-radius source".to_string(),
        why: format!(
            "{} has the highest risk score ({}) with {} impacted dependents.",
            top.system_id, top.risk_score, top.dependents_count
        ),
        fix: format!("Fix {} first; impacted systems: {}.", top.system_id, impacted_txt),
        systems: vec![top.system_id.clone()],
        owners: graph.owners(&top.system_id).to_vec(),
    })
}

fn impact_suffix(graph: &SystemGraph, systems: &[String]) -> String {
    if systems.is_empty() {
        return String::new();
    }
    let result = compute_impact(graph, systems);
    if result.impacted.is_empty() {
        return String::new();
    }
    format!(" Impacted: {}", describe_impacted(&result.impacted))
}

/// Assemble every advisory hint for one evaluation.
pub fn build_hints(
    rows: &[SystemRow],
    graph: &SystemGraph,
    drift: &DriftSummary,
    risk: &[RiskRow],
) -> Vec<Hint> {
    let mut hints = violation_hints(rows);
    hints.extend(sla_hints(rows));
    for hint in hints
        .iter_mut()
        .filter(|h| h.severity == HintSeverity::High && !h.systems.is_empty())
    {
        let suffix = impact_suffix(graph, &hint.systems);
        hint.why.push_str(&suffix);
    }
    if let Some(mut hint) = drift_hint(drift) {
        let suffix = impact_suffix(graph, &hint.systems);
        hint.why.push_str(&suffix);
        hints.push(hint);
    }
    hints.extend(blast_radius_hint(graph, risk));
    hints.sort_by(|a, b| a.severity.cmp(&b.severity).then_with(|| a.title.cmp(&b.title)));
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::DriftContributor;
    use crate::registry::{System, Tier};

    fn row(id: &str, status: HealthStatus, violations: &[ViolationCode], sla: SlaStatus) -> SystemRow {
        SystemRow {
            system_id: id.to_string(),
            is_sample: false,
            tier: Tier::Prod,
            owners: vec!["ops".to_string()],
            status,
            score_total: 36.5,
            violations: violations.iter().copied().collect(),
            days_since_last_event: 20,
            last_event_ts: None,
            stale: true,
            sla_status: sla,
            sla_max_days: 7,
            escalation_hint: "Escalate to owners (ops) and emit event within 7d.".to_string(),
        }
    }

    fn graph() -> SystemGraph {
        let sys = |id: &str, deps: &[&str]| System {
            system_id: id.to_string(),
            contracts_glob: "c".to_string(),
            events_glob: "e".to_string(),
            is_sample: false,
            notes: None,
            tier: Tier::Prod,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            owners: vec!["ops".to_string()],
        };
        SystemGraph::from_systems(&[sys("a", &[]), sys("b", &["a"]), sys("c", &[])])
    }

    #[test]
    fn test_all_clear_hint() {
        let rows = vec![row("a", HealthStatus::Green, &[], SlaStatus::Ok)];
        let hints = build_hints(&rows, &graph(), &DriftSummary::default(), &[]);
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].title, "No action required");
        assert_eq!(hints[0].severity, HintSeverity::Low);
    }

    #[test]
    fn test_top_two_violation_codes() {
        let rows = vec![
            row("a", HealthStatus::Red, &[ViolationCode::EventsRecent, ViolationCode::PrimitivesMin], SlaStatus::Ok),
            row("c", HealthStatus::Red, &[ViolationCode::EventsRecent, ViolationCode::InvariantsMin], SlaStatus::Ok),
        ];
        let hints = build_hints(&rows, &graph(), &DriftSummary::default(), &[]);
        let titles: Vec<&str> = hints.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "System contract missing minimum invariants",
                "System is stale (no recent events)",
            ]
        );
        let stale = &hints[1];
        assert_eq!(stale.systems, vec!["a", "c"]);
        assert!(stale.why.ends_with("Impacted: b (1 hop)"));
    }

    #[test]
    fn test_sla_hints_capped_and_ordered() {
        let rows = vec![
            row("c", HealthStatus::Green, &[], SlaStatus::Unknown),
            row("b", HealthStatus::Green, &[], SlaStatus::Breach),
            row("a", HealthStatus::Green, &[], SlaStatus::Unknown),
        ];
        let hints = sla_hints(&rows);
        assert_eq!(hints.len(), 2);
        assert_eq!(hints[0].systems, vec!["b"]);
        assert_eq!(hints[0].severity, HintSeverity::High);
        assert_eq!(hints[1].systems, vec!["a"]);
        assert_eq!(hints[1].severity, HintSeverity::Med);
    }

    #[test]
    fn test_drift_hint_lists_contributors() {
        let drift = DriftSummary {
            points: 2,
            latest_score: Some(60),
            score_24h_ago: Some(75),
            drift: Some(-15),
            severity: Some(DriftSeverity::Med),
            contributors: vec![DriftContributor {
                system_id: "a".to_string(),
                drop: 30,
            }],
        };
        let hint = drift_hint(&drift).expect("drift hint");
        assert_eq!(hint.severity, HintSeverity::Med);
        assert!(hint.why.starts_with("Score dropped 15 points vs 24h ago (75 -> 60)."));
        assert!(hint.why.contains("Top drift (24h): a -30."));
    }
}
