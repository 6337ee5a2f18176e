//! # Dependency Graph & Planner
//!
//! Builds a DAG over the entities selected for transfer, detects cycles
//! with Tarjan's SCC algorithm, and emits a tiered execution plan via
//! Kahn's algorithm. Deterministic for identical input: edges and tiers
//! are always ordered stably by entity name.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A schema entity under consideration for transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntity {
    pub name: String,
    pub primary_key: String,
    /// Lookup field -> target entity name.
    pub lookups: Vec<(String, String)>,
}

/// The dependency graph built from a selected set of schemas.
#[derive(Clone, Debug)]
pub struct Graph {
    pub entities: Vec<SchemaEntity>,
    /// entity name -> set of entity names it depends on (excluding self).
    edges: BTreeMap<String, BTreeSet<String>>,
    pub self_referential: BTreeSet<String>,
    /// entity name -> lookup fields whose target lies outside the
    /// selected set (preserved verbatim at import, no plan impact).
    pub external_references: BTreeMap<String, Vec<String>>,
}

/// Build the graph: for every entity `e` with lookup `l -> t`, add edge
/// `e -> t` if `t` is in the selected set; mark `self_ref` if `t == e`;
/// otherwise record `l` as an external reference.
pub fn build(selected: &[SchemaEntity]) -> Graph {
    let selected_names: BTreeSet<String> = selected.iter().map(|e| e.name.clone()).collect();
    let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut self_referential = BTreeSet::new();
    let mut external_references: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for entity in selected {
        let entry = edges.entry(entity.name.clone()).or_default();
        for (lookup_field, target) in &entity.lookups {
            if target == &entity.name {
                self_referential.insert(entity.name.clone());
            } else if selected_names.contains(target) {
                entry.insert(target.clone());
            } else {
                external_references
                    .entry(entity.name.clone())
                    .or_default()
                    .push(lookup_field.clone());
            }
        }
    }

    Graph {
        entities: selected.to_vec(),
        edges,
        self_referential,
        external_references,
    }
}

impl Graph {
    /// Intra-set dependencies of `name` (self-reference excluded — it never
    /// blocks tier assignment or export/import ordering).
    pub fn dependencies_of(&self, name: &str) -> BTreeSet<String> {
        self.edges.get(name).cloned().unwrap_or_default()
    }
}

/// Tarjan SCC over `graph.edges`, fatal on any component of size >= 2.
fn detect_cycles(graph: &Graph) -> CoreResult<()> {
    struct Tarjan<'a> {
        edges: &'a BTreeMap<String, BTreeSet<String>>,
        index: BTreeMap<String, usize>,
        lowlink: BTreeMap<String, usize>,
        on_stack: BTreeSet<String>,
        stack: Vec<String>,
        counter: usize,
        sccs: Vec<Vec<String>>,
    }

    impl<'a> Tarjan<'a> {
        fn strongconnect(&mut self, v: &str) {
            self.index.insert(v.to_string(), self.counter);
            self.lowlink.insert(v.to_string(), self.counter);
            self.counter += 1;
            self.stack.push(v.to_string());
            self.on_stack.insert(v.to_string());

            if let Some(targets) = self.edges.get(v) {
                for w in targets {
                    if !self.index.contains_key(w) {
                        self.strongconnect(w);
                        let wl = self.lowlink[w];
                        let vl = self.lowlink[v];
                        self.lowlink.insert(v.to_string(), vl.min(wl));
                    } else if self.on_stack.contains(w) {
                        let wi = self.index[w];
                        let vl = self.lowlink[v];
                        self.lowlink.insert(v.to_string(), vl.min(wi));
                    }
                }
            }

            if self.lowlink[v] == self.index[v] {
                let mut component = Vec::new();
                loop {
                    let w = self.stack.pop().expect("SCC stack underflow");
                    self.on_stack.remove(&w);
                    let done = w == v;
                    component.push(w);
                    if done {
                        break;
                    }
                }
                self.sccs.push(component);
            }
        }
    }

    let mut tarjan = Tarjan {
        edges: &graph.edges,
        index: BTreeMap::new(),
        lowlink: BTreeMap::new(),
        on_stack: BTreeSet::new(),
        stack: Vec::new(),
        counter: 0,
        sccs: Vec::new(),
    };

    for entity in &graph.entities {
        if !tarjan.index.contains_key(&entity.name) {
            tarjan.strongconnect(&entity.name);
        }
    }

    for mut scc in tarjan.sccs {
        if scc.len() >= 2 {
            scc.sort();
            return Err(CoreError::new(crate::error::ErrorCode::CyclicSchema, "cyclic schema dependency")
                .with_details(scc.join(", ")));
        }
    }

    Ok(())
}

/// One tier: entities whose intra-set dependencies only reference prior
/// tiers or self.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tier {
    pub entities: Vec<String>,
}

/// An ordered tiered execution plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    pub tiers: Vec<Tier>,
    pub self_referential: BTreeSet<String>,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tier) in self.tiers.iter().enumerate() {
            let names: Vec<String> = tier
                .entities
                .iter()
                .map(|e| {
                    if self.self_referential.contains(e) {
                        format!("{e} (self-ref)")
                    } else {
                        e.clone()
                    }
                })
                .collect();
            writeln!(f, "tier {i}: {}", names.join(", "))?;
        }
        Ok(())
    }
}

/// `Build(schemas) -> Graph`; fatal-faults on cycles via [`plan`], not here
/// (building the graph itself never fails — cycle detection is a planning
/// step, kept separate from building).
pub fn plan(graph: &Graph) -> CoreResult<Plan> {
    detect_cycles(graph)?;

    let mut remaining: BTreeSet<String> = graph.entities.iter().map(|e| e.name.clone()).collect();
    let mut tiers = Vec::new();

    while !remaining.is_empty() {
        let mut tier_entities: Vec<String> = remaining
            .iter()
            .filter(|name| {
                let deps = graph.edges.get(*name).cloned().unwrap_or_default();
                deps.iter().all(|d| !remaining.contains(d) || d == *name)
            })
            .cloned()
            .collect();

        if tier_entities.is_empty() {
            // Shouldn't happen: detect_cycles already ruled out true cycles.
            return Err(CoreError::fatal("planner made no progress; unexpected residual dependency"));
        }

        tier_entities.sort();
        for e in &tier_entities {
            remaining.remove(e);
        }
        tiers.push(Tier { entities: tier_entities });
    }

    Ok(Plan {
        tiers,
        self_referential: graph.self_referential.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, lookups: &[(&str, &str)]) -> SchemaEntity {
        SchemaEntity {
            name: name.to_string(),
            primary_key: format!("{name}id"),
            lookups: lookups.iter().map(|(f, t)| (f.to_string(), t.to_string())).collect(),
        }
    }

    #[test]
    fn two_entity_cycle_is_fatal() {
        let a = entity("A", &[("lookup", "B")]);
        let b = entity("B", &[("lookup", "A")]);
        let graph = build(&[a, b]);
        let err = plan(&graph).unwrap_err();
        assert_eq!(err.code.as_str(), "CyclicSchema");
    }

    #[test]
    fn self_reference_only_is_single_tier() {
        let a = entity("A", &[("parentid", "A")]);
        let graph = build(&[a]);
        let p = plan(&graph).unwrap();
        assert_eq!(p.tiers.len(), 1);
        assert_eq!(p.tiers[0].entities, vec!["A".to_string()]);
        assert!(p.self_referential.contains("A"));
    }

    #[test]
    fn linear_chain_tiers_in_order() {
        let a = entity("A", &[]);
        let b = entity("B", &[("aid", "A")]);
        let c = entity("C", &[("bid", "B")]);
        let graph = build(&[c, a, b]);
        let p = plan(&graph).unwrap();
        assert_eq!(p.tiers.len(), 3);
        assert_eq!(p.tiers[0].entities, vec!["A".to_string()]);
        assert_eq!(p.tiers[1].entities, vec!["B".to_string()]);
        assert_eq!(p.tiers[2].entities, vec!["C".to_string()]);
    }

    #[test]
    fn external_reference_recorded_not_edged() {
        let a = entity("A", &[("ownerid", "systemuser")]);
        let graph = build(&[a]);
        assert!(graph.external_references.contains_key("A"));
        assert_eq!(graph.edges.get("A").map(|s| s.len()).unwrap_or(0), 0);
    }

    #[test]
    fn stable_order_within_tier_by_name() {
        let a = entity("Zebra", &[]);
        let b = entity("Apple", &[]);
        let graph = build(&[a, b]);
        let p = plan(&graph).unwrap();
        assert_eq!(p.tiers[0].entities, vec!["Apple".to_string(), "Zebra".to_string()]);
    }

    #[test]
    fn display_marks_self_reference() {
        let a = entity("A", &[("parentid", "A")]);
        let graph = build(&[a]);
        let p = plan(&graph).unwrap();
        let rendered = p.to_string();
        assert!(rendered.contains("A (self-ref)"));
    }
}
