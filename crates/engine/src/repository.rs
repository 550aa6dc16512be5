//! Persistence boundary for KPI definitions and values.
//!
//! The engine only needs three things from storage: list a game's KPIs,
//! write a computed value back, and save an edited formula together with its
//! derived dependency list.

use std::cell::Cell;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::kpi::{GameId, Kpi, KpiId};

#[derive(Debug, Clone, PartialEq)]
pub enum RepoError {
    /// No KPI with this id exists in the store.
    NotFound(KpiId),
    /// Tried to save a formula on a stored (input) KPI.
    NotCalculated(KpiId),
    /// Reading or writing the backing store failed.
    Io(String),
    /// The backing store holds data that cannot be decoded.
    Parse(String),
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "KPI {id} not found"),
            Self::NotCalculated(id) => write!(f, "KPI {id} is not a calculated KPI"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for RepoError {}

pub trait KpiRepository {
    /// All KPIs belonging to `game`, in storage order.
    fn list_kpis(&self, game: &GameId) -> Result<Vec<Kpi>, RepoError>;

    /// Persist a freshly computed value as the KPI's current value.
    fn update_kpi_value(&mut self, kpi: &KpiId, value: f64) -> Result<(), RepoError>;

    /// Persist an edited formula along with the references it contains.
    fn update_kpi_formula(&mut self, kpi: &KpiId, formula: &str, depends_on: &[KpiId]) -> Result<(), RepoError>;
}

/// Store kept entirely in memory. Records every value write.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    kpis: Vec<Kpi>,
    index: FxHashMap<KpiId, usize>,
    writes: Vec<(KpiId, f64)>,
    /// Ids whose value writes are rejected, for exercising failure paths.
    failing: Vec<KpiId>,
    /// Number of upcoming `list_kpis` calls that fail.
    fetch_failures: Cell<u32>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kpis(kpis: impl IntoIterator<Item = Kpi>) -> Self {
        let mut repo = Self::new();
        for kpi in kpis {
            repo.insert(kpi);
        }
        repo
    }

    /// Add or replace a KPI.
    pub fn insert(&mut self, kpi: Kpi) {
        match self.index.get(&kpi.id) {
            Some(&i) => self.kpis[i] = kpi,
            None => {
                self.index.insert(kpi.id.clone(), self.kpis.len());
                self.kpis.push(kpi);
            }
        }
    }

    pub fn get(&self, id: &KpiId) -> Option<&Kpi> {
        self.index.get(id).map(|&i| &self.kpis[i])
    }

    pub fn get_mut(&mut self, id: &KpiId) -> Option<&mut Kpi> {
        self.index.get(id).map(|&i| &mut self.kpis[i])
    }

    pub fn all(&self) -> &[Kpi] {
        &self.kpis
    }

    /// Every value write in the order it happened.
    pub fn writes(&self) -> &[(KpiId, f64)] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Make value writes for `id` fail with an IO error.
    pub fn fail_writes_for(&mut self, id: KpiId) {
        self.failing.push(id);
    }

    /// Make the next `count` fetches fail with an IO error.
    pub fn fail_next_fetches(&mut self, count: u32) {
        self.fetch_failures.set(count);
    }
}

impl KpiRepository for InMemoryRepository {
    fn list_kpis(&self, game: &GameId) -> Result<Vec<Kpi>, RepoError> {
        let failures = self.fetch_failures.get();
        if failures > 0 {
            self.fetch_failures.set(failures - 1);
            return Err(RepoError::Io(format!("fetch failed for game {game}")));
        }
        Ok(self.kpis.iter().filter(|k| &k.game_id == game).cloned().collect())
    }

    fn update_kpi_value(&mut self, kpi: &KpiId, value: f64) -> Result<(), RepoError> {
        if self.failing.contains(kpi) {
            return Err(RepoError::Io(format!("write rejected for {kpi}")));
        }
        let entry = self.get_mut(kpi).ok_or_else(|| RepoError::NotFound(kpi.clone()))?;
        entry.current_value = Some(value);
        self.writes.push((kpi.clone(), value));
        Ok(())
    }

    fn update_kpi_formula(&mut self, kpi: &KpiId, formula: &str, _depends_on: &[KpiId]) -> Result<(), RepoError> {
        let entry = self.get_mut(kpi).ok_or_else(|| RepoError::NotFound(kpi.clone()))?;
        if !entry.is_calculated() {
            return Err(RepoError::NotCalculated(kpi.clone()));
        }
        // depends_on is derived from the text when the formula is built
        entry.set_formula(formula);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "00000000-0000-4000-8000-00000000000a";
    const B: &str = "00000000-0000-4000-8000-00000000000b";

    fn repo() -> InMemoryRepository {
        InMemoryRepository::with_kpis([
            Kpi::stored(A, GameId::new("g1"), "Revenue", 10.0),
            Kpi::calculated(B, GameId::new("g1"), "Double", format!("kpi:{A} * 2")),
            Kpi::stored("other", GameId::new("g2"), "Other", 1.0),
        ])
    }

    #[test]
    fn test_list_filters_by_game() {
        let repo = repo();
        let kpis = repo.list_kpis(&GameId::new("g1")).unwrap();
        assert_eq!(kpis.len(), 2);
        assert_eq!(kpis[0].name, "Revenue");
        assert!(repo.list_kpis(&GameId::new("none")).unwrap().is_empty());
    }

    #[test]
    fn test_update_value_records_write() {
        let mut repo = repo();
        repo.update_kpi_value(&KpiId::from(B), 20.0).unwrap();
        assert_eq!(repo.get(&KpiId::from(B)).unwrap().current_value, Some(20.0));
        assert_eq!(repo.writes(), &[(KpiId::from(B), 20.0)]);
    }

    #[test]
    fn test_update_unknown_is_not_found() {
        let mut repo = repo();
        let missing = KpiId::from("missing");
        assert_eq!(
            repo.update_kpi_value(&missing, 1.0),
            Err(RepoError::NotFound(missing.clone()))
        );
        assert!(repo.update_kpi_formula(&missing, "1", &[]).is_err());
    }

    #[test]
    fn test_update_formula() {
        let mut repo = repo();
        repo.update_kpi_formula(&KpiId::from(B), &format!("kpi:{A} * 3"), &[KpiId::from(A)])
            .unwrap();
        let kpi = repo.get(&KpiId::from(B)).unwrap();
        assert_eq!(kpi.formula().unwrap().text(), format!("kpi:{A} * 3"));
        assert_eq!(kpi.depends_on(), &[KpiId::from(A)]);

        assert_eq!(
            repo.update_kpi_formula(&KpiId::from(A), "1", &[]),
            Err(RepoError::NotCalculated(KpiId::from(A)))
        );
    }

    #[test]
    fn test_failing_writes() {
        let mut repo = repo();
        repo.fail_writes_for(KpiId::from(B));
        assert!(matches!(
            repo.update_kpi_value(&KpiId::from(B), 1.0),
            Err(RepoError::Io(_))
        ));
        assert!(repo.writes().is_empty());
    }

    #[test]
    fn test_failing_fetches_recover() {
        let mut repo = repo();
        repo.fail_next_fetches(2);
        let game = GameId::new("g1");
        assert!(matches!(repo.list_kpis(&game), Err(RepoError::Io(_))));
        assert!(matches!(repo.list_kpis(&game), Err(RepoError::Io(_))));
        assert_eq!(repo.list_kpis(&game).unwrap().len(), 2);
    }
}
