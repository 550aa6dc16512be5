//! Recalculation reporting.
//!
//! Types describing the outcome of one recalculation pass and of cycle
//! checks made while editing.

use rustc_hash::FxHashMap;

use crate::formula::FormulaError;
use crate::kpi::KpiId;
use crate::repository::RepoError;

/// Report from one recalculation pass over a game's KPIs.
#[derive(Debug, Clone, Default)]
pub struct RecalcReport {
    /// Time taken for the pass in milliseconds.
    pub duration_ms: u64,

    /// Number of calculated KPIs that were evaluated (circular ones included).
    pub evaluated: usize,

    /// KPIs whose new value was written to the repository.
    pub written: Vec<KpiId>,

    /// Calculated KPIs whose value did not change.
    pub unchanged: usize,

    /// Maximum dependency depth encountered.
    /// A formula over stored KPIs only has depth 1.
    pub max_depth: usize,

    /// KPIs participating in circular definitions, sorted.
    pub circular: Vec<KpiId>,

    /// Circular groups found during the pass.
    pub cycles: Vec<CycleReport>,

    /// Formula errors, one per failing KPI.
    pub errors: Vec<RecalcError>,

    /// Writes the repository rejected. The pass continues past them.
    pub persist_failures: Vec<PersistFailure>,

    /// Evaluation order of non-circular calculated KPIs.
    pub eval_order: Vec<KpiId>,

    /// Value computed for every calculated KPI in this pass.
    pub values: FxHashMap<KpiId, f64>,
}

impl RecalcReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no cycles, formula errors or write failures occurred.
    pub fn is_clean(&self) -> bool {
        self.circular.is_empty() && self.errors.is_empty() && self.persist_failures.is_empty()
    }

    pub fn value(&self, kpi: &KpiId) -> Option<f64> {
        self.values.get(kpi).copied()
    }

    pub fn is_circular(&self, kpi: &KpiId) -> bool {
        self.circular.binary_search(kpi).is_ok()
    }

    /// Format as a concise one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} KPIs in {}ms, {} written, {} unchanged, depth={}, circular={}, errors={}",
            self.evaluated,
            self.duration_ms,
            self.written.len(),
            self.unchanged,
            self.max_depth,
            self.circular.len(),
            self.errors.len(),
        )
    }

    /// Format as a one-line log entry.
    ///
    /// Format: `[recalc] 14ms  62 kpis  written=3  depth=4  circular=0  errors=0`
    pub fn log_line(&self) -> String {
        let mut line = format!(
            "[recalc] {:>4}ms  {} kpis  written={}  depth={}  circular={}  errors={}",
            self.duration_ms,
            self.evaluated,
            self.written.len(),
            self.max_depth,
            self.circular.len(),
            self.errors.len(),
        );
        if !self.persist_failures.is_empty() {
            line.push_str(&format!("  persist_failures={}", self.persist_failures.len()));
        }
        line
    }
}

/// A formula error attributed to one KPI.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalcError {
    pub kpi: KpiId,
    pub error: FormulaError,
}

impl RecalcError {
    pub fn new(kpi: KpiId, error: FormulaError) -> Self {
        Self { kpi, error }
    }
}

/// A value the repository refused to store.
#[derive(Debug, Clone)]
pub struct PersistFailure {
    pub kpi: KpiId,
    pub value: f64,
    pub error: RepoError,
}

/// Report when cycle detection finds a circular definition.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// KPIs participating in the cycle.
    pub kpis: Vec<KpiId>,

    /// Human-readable description of the cycle.
    pub message: String,
}

impl CycleReport {
    pub fn new(kpis: Vec<KpiId>, message: impl Into<String>) -> Self {
        Self {
            kpis,
            message: message.into(),
        }
    }

    /// Create a cycle report for a KPI whose formula reads itself.
    pub fn self_reference(kpi: KpiId) -> Self {
        let message = format!("KPI {kpi} references itself");
        Self {
            kpis: vec![kpi],
            message,
        }
    }

    /// Create a cycle report for a multi-KPI cycle.
    pub fn cycle(kpis: Vec<KpiId>) -> Self {
        let names: Vec<&str> = kpis.iter().map(KpiId::as_str).collect();
        let message = match names.as_slice() {
            [first, .., last] if names.len() > 5 => format!(
                "Circular definition involving {} KPIs: {first} → ... → {last}",
                names.len()
            ),
            _ => format!("Circular definition: {}", names.join(" → ")),
        };
        Self { kpis, message }
    }

    /// Build the report for one circular group found during a pass.
    pub fn from_group(group: Vec<KpiId>) -> Self {
        match group.as_slice() {
            [single] => Self::self_reference(single.clone()),
            _ => Self::cycle(group),
        }
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CycleReport {}

#[cfg(test)]
mod tests {
    use super::*;

    fn kpi(n: usize) -> KpiId {
        KpiId::new(format!("00000000-0000-4000-8000-{n:012}"))
    }

    #[test]
    fn test_recalc_report_default() {
        let report = RecalcReport::default();
        assert_eq!(report.duration_ms, 0);
        assert_eq!(report.evaluated, 0);
        assert!(report.written.is_empty());
        assert!(report.errors.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn test_recalc_report_summary() {
        let report = RecalcReport {
            duration_ms: 42,
            evaluated: 10,
            written: vec![kpi(1), kpi(2)],
            unchanged: 8,
            max_depth: 3,
            ..Default::default()
        };
        assert_eq!(
            report.summary(),
            "10 KPIs in 42ms, 2 written, 8 unchanged, depth=3, circular=0, errors=0"
        );
    }

    #[test]
    fn test_recalc_report_log_line() {
        let report = RecalcReport {
            duration_ms: 14,
            evaluated: 62,
            written: vec![kpi(1), kpi(2), kpi(3)],
            max_depth: 4,
            ..Default::default()
        };
        assert_eq!(
            report.log_line(),
            "[recalc]   14ms  62 kpis  written=3  depth=4  circular=0  errors=0"
        );
    }

    #[test]
    fn test_recalc_report_log_line_with_problems() {
        let report = RecalcReport {
            duration_ms: 5,
            evaluated: 4,
            circular: vec![kpi(1), kpi(2)],
            errors: vec![RecalcError::new(kpi(3), FormulaError::DivisionByZero)],
            persist_failures: vec![PersistFailure {
                kpi: kpi(4),
                value: 1.0,
                error: RepoError::NotFound(kpi(4)),
            }],
            ..Default::default()
        };
        assert_eq!(
            report.log_line(),
            "[recalc]    5ms  4 kpis  written=0  depth=0  circular=2  errors=1  persist_failures=1"
        );
        assert!(!report.is_clean());
        assert!(report.is_circular(&kpi(2)));
        assert!(!report.is_circular(&kpi(3)));
    }

    #[test]
    fn test_cycle_report_self_reference() {
        let report = CycleReport::from_group(vec![kpi(1)]);
        assert_eq!(report.kpis.len(), 1);
        assert!(report.message.contains("references itself"));
    }

    #[test]
    fn test_cycle_report_small_cycle() {
        let report = CycleReport::from_group(vec![kpi(1), kpi(2), kpi(3)]);
        assert!(report.message.contains("→"));
        assert!(!report.message.contains("..."));
    }

    #[test]
    fn test_cycle_report_large_cycle() {
        let kpis: Vec<KpiId> = (0..10).map(kpi).collect();
        let report = CycleReport::cycle(kpis);
        assert!(report.message.contains("..."));
        assert!(report.message.contains("10 KPIs"));
    }

    #[test]
    fn test_cycle_report_display() {
        let report = CycleReport::new(vec![kpi(1)], "Test error");
        assert_eq!(format!("{}", report), "Test error");
    }
}
