//! Reference extraction from formula text.
//!
//! A KPI's `depends_on` set is always this function applied to its current
//! formula; nothing else writes it.

use rustc_hash::FxHashSet;

use crate::kpi::KpiId;

use super::tokenizer::{tokenize, TokenKind};

/// Referenced KPI ids, deduplicated, in order of first appearance.
pub fn extract_references(formula: &str) -> Vec<KpiId> {
    let mut seen = FxHashSet::default();
    tokenize(formula)
        .into_iter()
        .filter_map(|token| match token.kind {
            TokenKind::Reference { kpi_id } => Some(kpi_id),
            _ => None,
        })
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
