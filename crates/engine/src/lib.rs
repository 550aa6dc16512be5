pub mod dep_graph;
pub mod error;
pub mod formula;
pub mod kpi;
pub mod pass;
pub mod recalc;
pub mod repository;
pub mod scheduler;
pub mod session;
pub mod walker;

pub use error::EngineError;
pub use kpi::{GameId, Kpi, KpiId, KpiSet, KpiSource};
pub use pass::run_pass;
pub use recalc::RecalcReport;
pub use repository::{InMemoryRepository, KpiRepository, RepoError};
pub use scheduler::{RecalcScheduler, Trigger};
pub use session::EngineSession;
