//! Dependency graph for KPI formulas.
//!
//! Tracks precedents (KPIs a formula reads) and dependents (formulas that read
//! a given KPI) for the editing surface: "what changes if I edit X?" and
//! "would this formula introduce a loop?".
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B depends on A"  (A is a precedent of B)
//! ```

use rustc_hash::{FxHashMap, FxHashSet};

use crate::kpi::{KpiId, KpiSet};
use crate::recalc::CycleReport;

/// Precedent/dependent adjacency built from `depends_on`.
///
/// # Invariants
///
/// 1. **Bidirectional consistency:** If A ∈ preds[B] then B ∈ succs[A], and vice versa.
/// 2. **No dangling entries:** Empty sets are removed, not stored.
/// 3. **Atomic updates:** `replace_edges` is the only mutator that touches both maps.
#[derive(Default, Debug, Clone)]
pub struct DepGraph {
    /// B -> {A1, A2, ...}: KPIs that formula B reads.
    preds: FxHashMap<KpiId, FxHashSet<KpiId>>,

    /// A -> {B1, B2, ...}: formulas that read A.
    succs: FxHashMap<KpiId, FxHashSet<KpiId>>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from every calculated KPI's `depends_on`.
    pub fn from_kpis(kpis: &KpiSet) -> Self {
        let mut graph = Self::new();
        for kpi in kpis.calculated() {
            graph.replace_edges(&kpi.id, kpi.depends_on().iter().cloned().collect());
        }
        graph
    }

    /// Replace all edges for a formula KPI.
    ///
    /// Removes the KPI from its old precedents' dependent sets, then records
    /// the new precedents. Pass an empty set to clear.
    pub fn replace_edges(&mut self, kpi: &KpiId, new_preds: FxHashSet<KpiId>) {
        if let Some(old_preds) = self.preds.remove(kpi) {
            for pred in old_preds {
                if let Some(deps) = self.succs.get_mut(&pred) {
                    deps.remove(kpi);
                    if deps.is_empty() {
                        self.succs.remove(&pred);
                    }
                }
            }
        }

        if new_preds.is_empty() {
            return;
        }

        for pred in &new_preds {
            self.succs.entry(pred.clone()).or_default().insert(kpi.clone());
        }
        self.preds.insert(kpi.clone(), new_preds);
    }

    /// Every KPI whose value can change when `kpi` changes, sorted.
    pub fn transitive_dependents(&self, kpi: &KpiId) -> Vec<KpiId> {
        let mut seen: FxHashSet<&KpiId> = FxHashSet::default();
        let mut stack: Vec<&KpiId> = vec![kpi];

        while let Some(current) = stack.pop() {
            if let Some(deps) = self.succs.get(current) {
                for dep in deps {
                    if seen.insert(dep) {
                        stack.push(dep);
                    }
                }
            }
        }

        let mut out: Vec<KpiId> = seen.into_iter().cloned().collect();
        out.sort();
        out
    }

    /// Check whether giving `kpi` the precedents `new_preds` would close a loop.
    ///
    /// Does not modify the graph. A loop appears if `kpi` can already reach
    /// one of `new_preds` by following dependent edges; the report lists that
    /// path, starting at `kpi`.
    pub fn would_create_cycle(&self, kpi: &KpiId, new_preds: &[KpiId]) -> Option<CycleReport> {
        if new_preds.contains(kpi) {
            return Some(CycleReport::self_reference(kpi.clone()));
        }

        let targets: FxHashSet<&KpiId> = new_preds.iter().collect();
        let mut parent: FxHashMap<&KpiId, &KpiId> = FxHashMap::default();
        let mut visited: FxHashSet<&KpiId> = FxHashSet::default();
        visited.insert(kpi);
        let mut stack: Vec<&KpiId> = vec![kpi];

        while let Some(current) = stack.pop() {
            let Some(deps) = self.succs.get(current) else {
                continue;
            };
            for dep in deps {
                if !visited.insert(dep) {
                    continue;
                }
                parent.insert(dep, current);
                if targets.contains(dep) {
                    return Some(CycleReport::cycle(path_to(&parent, kpi, dep)));
                }
                stack.push(dep);
            }
        }

        None
    }

    /// Check all invariants. Panics if any are violated.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (kpi, preds) in &self.preds {
            assert!(!preds.is_empty(), "Empty preds set stored for {kpi}");
            for pred in preds {
                assert!(
                    self.succs.get(pred).is_some_and(|s| s.contains(kpi)),
                    "Missing succ edge: {pred} should list {kpi} as dependent"
                );
            }
        }
        for (kpi, deps) in &self.succs {
            assert!(!deps.is_empty(), "Empty succs set stored for {kpi}");
            for dep in deps {
                assert!(
                    self.preds.get(dep).is_some_and(|s| s.contains(kpi)),
                    "Missing pred edge: {dep} should list {kpi} as precedent"
                );
            }
        }
    }
}

/// Walk `parent` links back from `to` to `from`.
fn path_to<'g>(parent: &FxHashMap<&'g KpiId, &'g KpiId>, from: &KpiId, to: &'g KpiId) -> Vec<KpiId> {
    let mut path = vec![to.clone()];
    let mut current = to;
    while current != from {
        let Some(&prev) = parent.get(current) else {
            break;
        };
        path.push(prev.clone());
        current = prev;
    }
    path.reverse();
    path
}

#[cfg(test)]
fn sorted(set: Option<&FxHashSet<KpiId>>) -> Vec<KpiId> {
    let mut out: Vec<KpiId> = set.into_iter().flatten().cloned().collect();
    out.sort();
    out
}
