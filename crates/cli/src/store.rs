// JSON file store for KPIs
// Format: { "kpis": [ { "id": ..., "kind": "stored" | "calculated", ... } ] }

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use kpisim_engine::{GameId, Kpi, KpiId, KpiRepository, RepoError};

#[derive(Deserialize)]
struct StoreFile {
    kpis: Vec<Kpi>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    kpis: &'a [Kpi],
}

/// KPI repository backed by one JSON file.
///
/// Updates apply in memory; `save` writes the whole file back atomically.
#[derive(Debug)]
pub struct JsonFileRepository {
    path: PathBuf,
    kpis: Vec<Kpi>,
    dirty: bool,
}

impl JsonFileRepository {
    pub fn open(path: &Path) -> Result<Self, RepoError> {
        let text = fs::read_to_string(path)
            .map_err(|e| RepoError::Io(format!("{}: {}", path.display(), e)))?;
        let file: StoreFile = serde_json::from_str(&text)
            .map_err(|e| RepoError::Parse(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            path: path.to_path_buf(),
            kpis: file.kpis,
            dirty: false,
        })
    }

    pub fn kpis(&self) -> &[Kpi] {
        &self.kpis
    }

    pub fn find(&self, id: &KpiId) -> Option<&Kpi> {
        self.kpis.iter().find(|k| &k.id == id)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the store back if anything changed.
    pub fn save(&mut self) -> Result<(), RepoError> {
        if !self.dirty {
            return Ok(());
        }

        let json = serde_json::to_string_pretty(&StoreFileRef { kpis: &self.kpis })
            .map_err(|e| RepoError::Parse(e.to_string()))?;

        // Atomic write: write to temp file first, then rename
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json)
            .map_err(|e| RepoError::Io(format!("failed to write temp file: {}", e)))?;
        fs::rename(&temp_path, &self.path)
            .map_err(|e| RepoError::Io(format!("failed to rename to {}: {}", self.path.display(), e)))?;

        log::debug!("saved {} KPIs to {}", self.kpis.len(), self.path.display());
        self.dirty = false;
        Ok(())
    }

    fn find_mut(&mut self, id: &KpiId) -> Result<&mut Kpi, RepoError> {
        self.kpis
            .iter_mut()
            .find(|k| &k.id == id)
            .ok_or_else(|| RepoError::NotFound(id.clone()))
    }
}

impl KpiRepository for JsonFileRepository {
    fn list_kpis(&self, game: &GameId) -> Result<Vec<Kpi>, RepoError> {
        Ok(self.kpis.iter().filter(|k| &k.game_id == game).cloned().collect())
    }

    fn update_kpi_value(&mut self, kpi: &KpiId, value: f64) -> Result<(), RepoError> {
        self.find_mut(kpi)?.current_value = Some(value);
        self.dirty = true;
        Ok(())
    }

    fn update_kpi_formula(&mut self, kpi: &KpiId, formula: &str, _depends_on: &[KpiId]) -> Result<(), RepoError> {
        let entry = self.find_mut(kpi)?;
        if !entry.is_calculated() {
            return Err(RepoError::NotCalculated(kpi.clone()));
        }
        entry.set_formula(formula);
        self.dirty = true;
        Ok(())
    }
}
