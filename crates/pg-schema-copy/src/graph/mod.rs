//! Foreign-key dependency graph and copy ordering.
//!
//! Tables are ordered so that every referenced table is copied before the
//! tables that reference it. Ordering uses Kahn's algorithm one round at a
//! time: every table whose dependencies are all placed becomes ready in the
//! same round, and a round keeps the catalog's (alphabetical) input order.
//! When a round comes up empty the remaining tables form, or depend on, a
//! cycle; they are appended alphabetically and reported as unresolved.
//! Constraint suspension, not ordering, is what makes that remainder safe.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::catalog::TableCatalog;
use crate::core::schema::DependencyEdge;
use crate::core::traits::SchemaIntrospector;
use crate::error::{CopyError, Result};

/// Tables and the foreign-key edges between them.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    edges: BTreeSet<DependencyEdge>,
}

impl DependencyGraph {
    /// Query the source's foreign keys and build the graph over `catalog`'s tables.
    pub async fn load<I>(introspector: &I, catalog: &TableCatalog) -> Result<Self>
    where
        I: SchemaIntrospector + ?Sized,
    {
        let fks = introspector
            .list_foreign_keys(catalog.schema())
            .await
            .map_err(|e| {
                CopyError::Catalog(format!(
                    "listing foreign keys in {}: {}",
                    catalog.schema(),
                    e
                ))
            })?;

        Ok(Self::build(catalog.list_tables(), fks))
    }

    /// Build a graph over `tables`.
    ///
    /// Edges touching a table outside `tables` are dropped, as are
    /// self-references. Duplicate edges collapse to one.
    pub fn build<I>(tables: Vec<String>, edges: I) -> Self
    where
        I: IntoIterator<Item = DependencyEdge>,
    {
        let mut seen = HashSet::new();
        let nodes: Vec<String> = tables
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();

        let edges = edges
            .into_iter()
            .filter(|e| !e.is_self_reference())
            .filter(|e| seen.contains(&e.dependent) && seen.contains(&e.referenced))
            .collect();

        Self { nodes, edges }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.iter()
    }

    /// Tables `table` has a foreign key into.
    pub fn dependencies_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.dependent == table)
            .map(|e| e.referenced.as_str())
    }

    /// Order every node for copying.
    ///
    /// Always terminates and returns each node exactly once.
    pub fn topological_order(&self) -> CopyPlan {
        let position: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let mut pending: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.as_str(), 0)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            *pending.entry(edge.dependent.as_str()).or_default() += 1;
            dependents
                .entry(edge.referenced.as_str())
                .or_default()
                .push(edge.dependent.as_str());
        }

        let mut order: Vec<String> = Vec::with_capacity(self.nodes.len());
        let mut ready: Vec<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|n| pending[n] == 0)
            .collect();
        let mut round = 0;

        while !ready.is_empty() {
            round += 1;
            debug!("Dependency round {}: {:?}", round, ready);

            let mut next = Vec::new();
            for table in &ready {
                if let Some(children) = dependents.get(table) {
                    for child in children {
                        if let Some(count) = pending.get_mut(child) {
                            *count -= 1;
                            if *count == 0 {
                                next.push(*child);
                            }
                        }
                    }
                }
            }

            order.extend(ready.iter().map(|t| t.to_string()));
            next.sort_by_key(|t| position[t]);
            ready = next;
        }

        let placed: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut unresolved: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| !placed.contains(n.as_str()))
            .cloned()
            .collect();
        unresolved.sort();
        order.extend(unresolved.iter().cloned());

        CopyPlan { order, unresolved }
    }
}

/// The order tables are copied in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyPlan {
    /// Every table, dependencies first.
    pub order: Vec<String>,

    /// Tables placed by the alphabetical cycle fallback. Their relative
    /// order does not honor foreign keys.
    pub unresolved: Vec<String>,
}

impl CopyPlan {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// True when every table was placed by dependency order.
    pub fn is_fully_ordered(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

/// Order `tables` given foreign-key `edges`.
pub fn topological_order<I>(tables: &[&str], edges: I) -> CopyPlan
where
    I: IntoIterator<Item = DependencyEdge>,
{
    DependencyGraph::build(tables.iter().map(|t| t.to_string()).collect(), edges)
        .topological_order()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(dependent: &str, referenced: &str) -> DependencyEdge {
        DependencyEdge::new(dependent, referenced)
    }

    fn assert_respects_edges(plan: &CopyPlan, edges: &[DependencyEdge]) {
        let pos: HashMap<&str, usize> = plan.iter().enumerate().map(|(i, t)| (t, i)).collect();
        for e in edges {
            assert!(
                pos[e.referenced.as_str()] < pos[e.dependent.as_str()],
                "{} must come before {} in {:?}",
                e.referenced,
                e.dependent,
                plan.order
            );
        }
    }

    fn assert_permutation(plan: &CopyPlan, tables: &[&str]) {
        let mut got = plan.order.clone();
        got.sort();
        let mut want: Vec<String> = tables.iter().map(|t| t.to_string()).collect();
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn test_customers_before_orders() {
        let plan = topological_order(&["customers", "orders"], vec![edge("orders", "customers")]);
        assert_eq!(plan.order, vec!["customers", "orders"]);
        assert!(plan.is_fully_ordered());
    }

    #[test]
    fn test_reverse_alphabetical_dependency() {
        // "accounts" sorts first but depends on "zones"
        let plan = topological_order(&["accounts", "zones"], vec![edge("accounts", "zones")]);
        assert_eq!(plan.order, vec!["zones", "accounts"]);
    }

    #[test]
    fn test_cyclic_pair_falls_back_alphabetically() {
        let plan = topological_order(&["b", "a"], vec![edge("a", "b"), edge("b", "a")]);
        assert_eq!(plan.order, vec!["a", "b"]);
        assert_eq!(plan.unresolved, vec!["a", "b"]);
    }

    #[test]
    fn test_cycle_fallback_is_deterministic() {
        let edges = vec![
            edge("x", "y"),
            edge("y", "z"),
            edge("z", "x"),
            edge("w", "x"),
        ];
        let tables = ["w", "x", "y", "z", "base"];
        let first = topological_order(&tables, edges.clone());
        for _ in 0..10 {
            assert_eq!(topological_order(&tables, edges.clone()), first);
        }
        assert_eq!(first.order, vec!["base", "w", "x", "y", "z"]);
        assert_eq!(first.unresolved, vec!["w", "x", "y", "z"]);
    }

    #[test]
    fn test_round_preserves_input_order() {
        // All three are ready in the first round; input order wins over alphabetical
        let plan = topological_order(&["c", "a", "b"], Vec::new());
        assert_eq!(plan.order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_full_round_is_processed() {
        // Several tables become ready in the same round; none may be dropped
        let edges = vec![
            edge("orders", "customers"),
            edge("invoices", "customers"),
            edge("items", "orders"),
            edge("items", "products"),
        ];
        let tables = ["customers", "invoices", "items", "orders", "products"];
        let plan = topological_order(&tables, edges.clone());
        assert_permutation(&plan, &tables);
        assert_respects_edges(&plan, &edges);
        assert_eq!(
            plan.order,
            vec!["customers", "products", "invoices", "orders", "items"]
        );
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let graph = DependencyGraph::build(
            vec!["a".into(), "b".into()],
            vec![edge("b", "a"), edge("b", "a"), edge("b", "a")],
        );
        assert_eq!(graph.edges().count(), 1);
        assert_eq!(graph.topological_order().order, vec!["a", "b"]);
    }

    #[test]
    fn test_self_reference_does_not_force_fallback() {
        let edges = vec![edge("employees", "employees"), edge("employees", "depts")];
        let plan = topological_order(&["depts", "employees"], edges);
        assert_eq!(plan.order, vec!["depts", "employees"]);
        assert!(plan.is_fully_ordered());
    }

    #[test]
    fn test_edges_outside_table_set_are_dropped() {
        let edges = vec![edge("orders", "customers"), edge("orders", "audit")];
        let graph = DependencyGraph::build(vec!["orders".into(), "customers".into()], edges);
        let deps: Vec<_> = graph.dependencies_of("orders").collect();
        assert_eq!(deps, vec!["customers"]);
        assert_eq!(graph.topological_order().order, vec!["customers", "orders"]);
    }

    #[test]
    fn test_dependent_of_cycle_goes_to_fallback() {
        let edges = vec![edge("a", "b"), edge("b", "a"), edge("c", "a"), edge("d", "e")];
        let tables = ["a", "b", "c", "d", "e"];
        let plan = topological_order(&tables, edges);
        assert_eq!(plan.order, vec!["e", "d", "a", "b", "c"]);
        assert_eq!(plan.unresolved, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_graph() {
        let plan = topological_order(&[], Vec::new());
        assert!(plan.is_empty());
        assert!(plan.is_fully_ordered());
    }

    #[test]
    fn test_generated_acyclic_graphs() {
        // Layered graphs where table tN may reference any table with a smaller index
        for seed in 0u64..50 {
            let n = 2 + (seed % 12) as usize;
            let names: Vec<String> = (0..n).map(|i| format!("t{:02}", (i * 7 + seed as usize) % 100)).collect();
            let mut unique = names.clone();
            unique.sort();
            unique.dedup();
            if unique.len() != names.len() {
                continue;
            }

            let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            let mut edges = Vec::new();
            for i in 1..n {
                for j in 0..i {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    if (state >> 33) % 3 == 0 {
                        edges.push(edge(&names[i], &names[j]));
                    }
                }
            }

            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let plan = topological_order(&refs, edges.clone());
            assert_permutation(&plan, &refs);
            assert_respects_edges(&plan, &edges);
            assert!(plan.is_fully_ordered());
        }
    }

    #[test]
    fn test_generated_cyclic_graphs_terminate_as_permutations() {
        for n in 1usize..15 {
            let names: Vec<String> = (0..n).map(|i| format!("t{}", i)).collect();
            let edges: Vec<_> = (0..n)
                .map(|i| edge(&names[i], &names[(i + 1) % n]))
                .chain((0..n).map(|i| edge(&names[i], &names[(i * 3) % n])))
                .collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let plan = topological_order(&refs, edges);
            assert_permutation(&plan, &refs);
        }
    }
}
