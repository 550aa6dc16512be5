//! One recalculation pass: fetch, evaluate, write back changes.

use std::time::Instant;

use crate::error::EngineError;
use crate::kpi::{GameId, KpiId, KpiSet};
use crate::recalc::{CycleReport, PersistFailure, RecalcError, RecalcReport};
use crate::repository::KpiRepository;
use crate::walker::{evaluate_all, PassOutcome};

/// Values to persist after a pass, plus the count of untouched KPIs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePlan {
    /// `(kpi, new value)` in set order.
    pub writes: Vec<(KpiId, f64)>,
    pub unchanged: usize,
}

/// Decide which computed values need writing.
///
/// A value is written when it differs from the KPI's `current_value` (or the
/// KPI has none yet). Circular KPIs are never written, so they keep their
/// last good value.
pub fn plan_writes(kpis: &KpiSet, outcome: &PassOutcome) -> WritePlan {
    let mut plan = WritePlan::default();
    for kpi in kpis.calculated() {
        if outcome.is_circular(&kpi.id) {
            continue;
        }
        let Some(value) = outcome.value(&kpi.id) else {
            continue;
        };
        if kpi.current_value == Some(value) {
            plan.unchanged += 1;
        } else {
            plan.writes.push((kpi.id.clone(), value));
        }
    }
    plan
}

/// Run a full pass over `game`'s KPIs and persist changed values.
///
/// Only the fetch can fail the pass. Formula errors, cycles and rejected
/// writes are collected in the report.
pub fn run_pass<R: KpiRepository + ?Sized>(repo: &mut R, game: &GameId) -> Result<RecalcReport, EngineError> {
    let start = Instant::now();

    let kpis: KpiSet = repo.list_kpis(game)?.into_iter().collect();
    let outcome = evaluate_all(&kpis);
    let plan = plan_writes(&kpis, &outcome);

    let mut report = RecalcReport::new();
    report.evaluated = kpis.calculated().count();
    report.unchanged = plan.unchanged;

    for (kpi, value) in plan.writes {
        match repo.update_kpi_value(&kpi, value) {
            Ok(()) => report.written.push(kpi),
            Err(error) => {
                log::warn!("failed to persist KPI {} = {}: {}", kpi, value, error);
                report.persist_failures.push(PersistFailure { kpi, value, error });
            }
        }
    }

    report.max_depth = outcome.max_depth();
    report.cycles = outcome.cycles.into_iter().map(CycleReport::from_group).collect();
    report.circular = outcome.circular;
    report.errors = outcome
        .faults
        .into_iter()
        .map(|fault| RecalcError::new(fault.kpi, fault.error))
        .collect();
    report.eval_order = outcome.order;
    report.values = outcome.values;
    report.duration_ms = start.elapsed().as_millis() as u64;

    for cycle in &report.cycles {
        log::warn!("{} (game {})", cycle, game);
    }
    log::info!("{}", report.log_line());

    Ok(report)
}
