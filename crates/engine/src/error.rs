use std::fmt;

use crate::formula::editor::EditError;
use crate::kpi::KpiId;
use crate::repository::RepoError;

/// Errors surfaced by passes and editing sessions.
///
/// Formula problems inside a pass are not errors at this level; they are
/// reported per KPI in the `RecalcReport`.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    Repository(RepoError),
    /// No KPI with this id in the session's game.
    UnknownKpi(KpiId),
    /// Formula edits only apply to calculated KPIs.
    NotCalculated(KpiId),
    Edit(EditError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repository(err) => write!(f, "repository error: {err}"),
            Self::UnknownKpi(id) => write!(f, "unknown KPI {id}"),
            Self::NotCalculated(id) => write!(f, "KPI {id} has no formula"),
            Self::Edit(err) => write!(f, "edit failed: {err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Repository(err) => Some(err),
            Self::Edit(err) => Some(err),
            Self::UnknownKpi(_) | Self::NotCalculated(_) => None,
        }
    }
}

impl From<RepoError> for EngineError {
    fn from(err: RepoError) -> Self {
        Self::Repository(err)
    }
}

impl From<EditError> for EngineError {
    fn from(err: EditError) -> Self {
        Self::Edit(err)
    }
}
