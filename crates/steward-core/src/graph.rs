//! Dependency graph over registered systems.
//!
//! `depends_on` edges point from a system to its prerequisites; the
//! `dependents` map is the reverse. Topological order lists prerequisites
//! first and breaks ties alphabetically (Kahn's algorithm over a min-heap).

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use serde::Serialize;

use crate::registry::{Registry, System, Tier};

pub const GRAPH_VERSION: &str = "1.0";

/// Deterministic graph view built from a validated registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemGraph {
    depends_on: BTreeMap<String, Vec<String>>,
    dependents: BTreeMap<String, Vec<String>>,
    tiers: BTreeMap<String, Tier>,
    owners: BTreeMap<String, Vec<String>>,
    samples: BTreeSet<String>,
}

/// Serialized graph artifact (`graph.json`).
#[derive(Debug, Clone, Serialize)]
pub struct GraphDocument {
    pub graph_version: String,
    pub depends_on: BTreeMap<String, Vec<String>>,
    pub dependents: BTreeMap<String, Vec<String>>,
    pub topo_order: Vec<String>,
    pub tiers: BTreeMap<String, Tier>,
    pub owners: BTreeMap<String, Vec<String>>,
}

impl SystemGraph {
    pub fn build(registry: &Registry) -> Self {
        Self::from_systems(registry.systems())
    }

    pub fn from_systems(systems: &[System]) -> Self {
        let mut graph = SystemGraph::default();
        for s in systems {
            let mut deps: Vec<String> = s.depends_on.clone();
            deps.sort();
            deps.dedup();
            graph.depends_on.insert(s.system_id.clone(), deps);
            graph.dependents.entry(s.system_id.clone()).or_default();
            graph.tiers.insert(s.system_id.clone(), s.tier);
            let mut owners = s.owners.clone();
            owners.sort();
            graph.owners.insert(s.system_id.clone(), owners);
            if s.is_sample {
                graph.samples.insert(s.system_id.clone());
            }
        }
        let edges: Vec<(String, String)> = graph
            .depends_on
            .iter()
            .flat_map(|(sid, deps)| deps.iter().map(move |d| (d.clone(), sid.clone())))
            .collect();
        for (dep, sid) in edges {
            // Unknown targets have no dependents entry.
            if let Some(list) = graph.dependents.get_mut(&dep) {
                list.push(sid);
            }
        }
        for list in graph.dependents.values_mut() {
            list.sort();
        }
        graph
    }

    pub fn contains(&self, system_id: &str) -> bool {
        self.depends_on.contains_key(system_id)
    }

    pub fn depends_on(&self, system_id: &str) -> &[String] {
        self.depends_on
            .get(system_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn dependents(&self, system_id: &str) -> &[String] {
        self.dependents
            .get(system_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Tier of `system_id`, `prod` when unknown.
    pub fn tier(&self, system_id: &str) -> Tier {
        self.tiers.get(system_id).copied().unwrap_or(Tier::Prod)
    }

    pub fn owners(&self, system_id: &str) -> &[String] {
        self.owners.get(system_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_sample(&self, system_id: &str) -> bool {
        self.samples.contains(system_id)
    }

    /// Prerequisites before dependents; ties broken by ascending `system_id`.
    ///
    /// Nodes left over by a cycle are appended in sorted order so the
    /// output is total even on unvalidated input.
    pub fn topological_order(&self) -> Vec<String> {
        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        for (sid, deps) in &self.depends_on {
            let known = deps.iter().filter(|d| self.contains(d)).count();
            indegree.insert(sid.as_str(), known);
        }

        let mut heap: BinaryHeap<Reverse<&str>> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(sid, _)| Reverse(*sid))
            .collect();

        let mut out: Vec<String> = Vec::with_capacity(indegree.len());
        while let Some(Reverse(node)) = heap.pop() {
            out.push(node.to_string());
            for next in self.dependents(node) {
                if let Some(deg) = indegree.get_mut(next.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        heap.push(Reverse(next.as_str()));
                    }
                }
            }
        }

        if out.len() != indegree.len() {
            let placed: BTreeSet<String> = out.iter().cloned().collect();
            out.extend(
                indegree
                    .keys()
                    .filter(|sid| !placed.contains(**sid))
                    .map(|sid| sid.to_string()),
            );
        }
        out
    }

    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            graph_version: GRAPH_VERSION.to_string(),
            depends_on: self.depends_on.clone(),
            dependents: self.dependents.clone(),
            topo_order: self.topological_order(),
            tiers: self.tiers.clone(),
            owners: self.owners.clone(),
        }
    }

    /// Human-readable rendering used by the `graph` command.
    pub fn render_text(&self) -> String {
        let order = self.topological_order();
        let mut out = String::new();
        out.push_str("Dependency Graph\n");
        out.push_str(&format!("Systems: {}\n\n", order.len()));
        out.push_str("Topological order (deps first):\n");
        out.push_str(&format!("  {}\n\n", order.join(" -> ")));
        out.push_str("Systems:\n");
        for sid in &order {
            let deps = self.depends_on(sid);
            let rdeps = self.dependents(sid);
            out.push_str(&format!(
                "  {} [{}] depends_on: {} | dependents: {}\n",
                sid,
                self.tier(sid),
                if deps.is_empty() { "-".to_string() } else { deps.join(", ") },
                if rdeps.is_empty() { "-".to_string() } else { rdeps.join(", ") },
            ));
        }
        out
    }
}
