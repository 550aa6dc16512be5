//! Evaluation pass over a KPI set.
//!
//! Depth-first walk over calculated KPIs following `depends_on` edges, with
//! two marks per KPI:
//!
//! - **visited**: the KPI has been reached (it has a DFS index)
//! - **on_stack**: the KPI is still being resolved
//!
//! Reaching a KPI that is still on the stack closes a loop. Loops are grouped
//! into strongly connected components (Tarjan); a component is evaluated
//! only when it is finished, which guarantees every dependency outside it
//! already has a value in the pass cache.
//!
//! The walk keeps its own frame stack instead of recursing, so very deep
//! dependency chains cannot overflow the thread stack.
//!
//! # Circular definitions
//!
//! Every member of a component with more than one KPI (or a KPI referencing
//! itself) is flagged circular and valued 0 for the pass. A KPI that merely
//! *reads* a circular KPI is not flagged; it evaluates normally and sees 0.
//! Membership is a property of the graph, so it does not depend on the
//! order in which the set is walked.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::formula::{evaluate, parse, tokenize, FormulaError, ValueLookup};
use crate::kpi::{Kpi, KpiId, KpiSet};

/// Formula failure attributed to one KPI.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaFault {
    pub kpi: KpiId,
    pub error: FormulaError,
}

/// Values and diagnostics from one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct PassOutcome {
    /// Computed value of every calculated KPI (0 for circular / faulty ones).
    pub values: FxHashMap<KpiId, f64>,
    /// KPIs participating in circular definitions, sorted.
    pub circular: Vec<KpiId>,
    /// Circular groups, each sorted; groups sorted by first member.
    pub cycles: Vec<Vec<KpiId>>,
    /// Per-KPI formula errors (malformed expression, division by zero).
    pub faults: Vec<FormulaFault>,
    /// Order in which non-circular calculated KPIs were evaluated.
    pub order: Vec<KpiId>,
    /// Dependency depth: a formula over stored KPIs only has depth 1.
    pub depths: FxHashMap<KpiId, usize>,
}

impl PassOutcome {
    pub fn value(&self, id: &KpiId) -> Option<f64> {
        self.values.get(id).copied()
    }

    pub fn is_circular(&self, id: &KpiId) -> bool {
        self.circular.binary_search(id).is_ok()
    }

    pub fn fault(&self, id: &KpiId) -> Option<&FormulaError> {
        self.faults.iter().find(|f| &f.kpi == id).map(|f| &f.error)
    }

    pub fn max_depth(&self) -> usize {
        self.depths.values().copied().max().unwrap_or(0)
    }
}

/// Evaluate every calculated KPI in the set.
pub fn evaluate_all(kpis: &KpiSet) -> PassOutcome {
    let mut walker = Walker::new(kpis);
    for kpi in kpis.calculated() {
        walker.visit(&kpi.id);
    }
    walker.finish()
}

/// Evaluate a single KPI (and whatever it needs) against the set.
///
/// Returns `None` for an id not in the set.
pub fn evaluate_one(kpis: &KpiSet, id: &KpiId) -> Option<f64> {
    if !kpis.contains(id) {
        return None;
    }
    let mut walker = Walker::new(kpis);
    Some(walker.value_of(id))
}

/// Depth-first walker holding the state of one pass.
pub struct Walker<'a> {
    kpis: &'a KpiSet,

    // Tarjan state. `index` doubles as the visited mark.
    index: FxHashMap<&'a KpiId, u32>,
    lowlink: FxHashMap<&'a KpiId, u32>,
    on_stack: FxHashSet<&'a KpiId>,
    stack: Vec<&'a KpiId>,
    next_index: u32,

    /// Pass-local memo of calculated values.
    cache: FxHashMap<KpiId, f64>,
    depths: FxHashMap<KpiId, usize>,
    circular: FxHashSet<KpiId>,
    cycles: Vec<Vec<KpiId>>,
    faults: Vec<FormulaFault>,
    order: Vec<KpiId>,
}

struct Frame<'a> {
    kpi: &'a Kpi,
    next_dep: usize,
}

impl<'a> Walker<'a> {
    pub fn new(kpis: &'a KpiSet) -> Self {
        Self {
            kpis,
            index: FxHashMap::default(),
            lowlink: FxHashMap::default(),
            on_stack: FxHashSet::default(),
            stack: Vec::new(),
            next_index: 0,
            cache: FxHashMap::default(),
            depths: FxHashMap::default(),
            circular: FxHashSet::default(),
            cycles: Vec::new(),
            faults: Vec::new(),
            order: Vec::new(),
        }
    }

    fn calculated(&self, id: &KpiId) -> Option<&'a Kpi> {
        self.kpis.get(id).filter(|k| k.is_calculated())
    }

    /// Resolve `root` and everything it depends on. No-op if already visited
    /// or if `root` is not a calculated KPI.
    pub fn visit(&mut self, root: &KpiId) {
        let Some(root) = self.calculated(root) else {
            return;
        };
        if self.index.contains_key(&root.id) {
            return;
        }

        let mut frames = vec![self.open(root)];

        while let Some(frame) = frames.last_mut() {
            let kpi: &'a Kpi = frame.kpi;
            let deps = kpi.depends_on();
            if frame.next_dep < deps.len() {
                let dep_id = &deps[frame.next_dep];
                frame.next_dep += 1;
                let current = &kpi.id;

                // Stored and unknown KPIs are leaves, resolved on demand
                let Some(dep) = self.calculated(dep_id) else {
                    continue;
                };

                match self.index.get(&dep.id).copied() {
                    None => {
                        let opened = self.open(dep);
                        frames.push(opened);
                    }
                    Some(dep_index) if self.on_stack.contains(&dep.id) => {
                        if let Some(low) = self.lowlink.get_mut(current) {
                            *low = (*low).min(dep_index);
                        }
                    }
                    // Finished in an earlier component; value is cached
                    Some(_) => {}
                }
            } else {
                let Some(finished) = frames.pop() else { break };
                let id: &'a KpiId = &finished.kpi.id;
                let low = self.lowlink.get(id).copied().unwrap_or(u32::MAX);

                if let Some(parent) = frames.last() {
                    if let Some(parent_low) = self.lowlink.get_mut(&parent.kpi.id) {
                        *parent_low = (*parent_low).min(low);
                    }
                }

                if self.index.get(id).copied() == Some(low) {
                    self.close_component(id);
                }
            }
        }
    }

    fn open(&mut self, kpi: &'a Kpi) -> Frame<'a> {
        let idx = self.next_index;
        self.next_index += 1;
        self.index.insert(&kpi.id, idx);
        self.lowlink.insert(&kpi.id, idx);
        self.stack.push(&kpi.id);
        self.on_stack.insert(&kpi.id);
        Frame { kpi, next_dep: 0 }
    }

    /// Pop the component rooted at `root` off the Tarjan stack and settle it.
    fn close_component(&mut self, root: &'a KpiId) {
        let mut component = Vec::new();
        while let Some(member) = self.stack.pop() {
            self.on_stack.remove(member);
            component.push(member);
            if member == root {
                break;
            }
        }

        let self_loop = component.len() == 1
            && self
                .kpis
                .get(component[0])
                .is_some_and(|k| k.depends_on().contains(component[0]));

        if component.len() > 1 || self_loop {
            self.mark_circular(component);
        } else {
            self.evaluate_kpi(component[0]);
        }
    }

    fn mark_circular(&mut self, component: Vec<&'a KpiId>) {
        let mut group: Vec<KpiId> = component.into_iter().cloned().collect();
        group.sort();
        log::warn!(
            "circular definition: {}",
            group.iter().map(KpiId::as_str).collect::<Vec<_>>().join(" -> ")
        );
        for id in &group {
            self.cache.insert(id.clone(), 0.0);
            self.circular.insert(id.clone());
        }
        self.cycles.push(group);
    }

    fn evaluate_kpi(&mut self, id: &'a KpiId) {
        let Some(kpi) = self.calculated(id) else {
            return;
        };
        let Some(formula) = kpi.formula() else {
            return;
        };

        let tokens = tokenize(formula.text());
        let result = match parse(&tokens) {
            Ok(expr) => evaluate(&expr, self),
            Err(error) => Err(error),
        };
        let value = match result {
            Ok(value) => value,
            Err(error) => {
                log::warn!("formula error in KPI {} ({}): {}", kpi.id, kpi.name, error);
                self.faults.push(FormulaFault { kpi: kpi.id.clone(), error });
                0.0
            }
        };

        let depth = 1 + formula
            .depends_on()
            .iter()
            .filter_map(|dep| self.depths.get(dep))
            .copied()
            .max()
            .unwrap_or(0);

        log::debug!("evaluated KPI {} = {} (depth {})", kpi.id, value, depth);
        self.depths.insert(kpi.id.clone(), depth);
        self.cache.insert(kpi.id.clone(), value);
        self.order.push(kpi.id.clone());
    }

    pub fn finish(self) -> PassOutcome {
        let mut circular: Vec<KpiId> = self.circular.into_iter().collect();
        circular.sort();
        let mut cycles = self.cycles;
        cycles.sort();

        PassOutcome {
            values: self.cache,
            circular,
            cycles,
            faults: self.faults,
            order: self.order,
            depths: self.depths,
        }
    }
}

/// Reference resolution for the current pass.
///
/// - stored KPI: `stored_value`, then `default_value`, then 0
/// - calculated KPI: cached value, computing it first if needed
/// - unknown id: 0
impl ValueLookup for Walker<'_> {
    fn value_of(&mut self, id: &KpiId) -> f64 {
        let kpis = self.kpis;
        let Some(kpi) = kpis.get(id) else {
            log::debug!("reference to unknown KPI {}", id);
            return 0.0;
        };
        if !kpi.is_calculated() {
            return kpi.input_value();
        }
        if let Some(&value) = self.cache.get(id) {
            return value;
        }
        self.visit(id);
        self.cache.get(id).copied().unwrap_or(0.0)
    }
}
