//! KPI data model.
//!
//! The engine never owns KPI storage. A `KpiSet` is a snapshot handed in by
//! the repository for one evaluation pass; results flow back out as values.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::formula::refs::extract_references;

/// Stable KPI identifier (36-character dashed hexadecimal text).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KpiId(String);

impl KpiId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KpiId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KpiId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of the game a KPI belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Formula text plus the KPI ids it references.
///
/// `depends_on` is derived: it is recomputed from the text on every
/// construction and cannot be set independently. Serializes as plain text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Formula {
    text: String,
    depends_on: Vec<KpiId>,
}

impl Formula {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let depends_on = extract_references(&text);
        Self { text, depends_on }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Referenced KPI ids, deduplicated, in order of first appearance.
    pub fn depends_on(&self) -> &[KpiId] {
        &self.depends_on
    }
}

impl From<String> for Formula {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<Formula> for String {
    fn from(formula: Formula) -> Self {
        formula.text
    }
}

/// Where a KPI's value comes from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KpiSource {
    /// Operator-entered number.
    Stored,
    /// Derived from a formula over other KPIs.
    Calculated { formula: Formula },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    pub id: KpiId,
    pub game_id: GameId,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub category: String,
    #[serde(flatten)]
    pub source: KpiSource,
    #[serde(default)]
    pub stored_value: Option<f64>,
    #[serde(default)]
    pub default_value: Option<f64>,
    #[serde(default)]
    pub current_value: Option<f64>,
}

impl Kpi {
    pub fn stored(id: impl Into<KpiId>, game_id: GameId, name: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            game_id,
            name: name.into(),
            unit: String::new(),
            category: String::new(),
            source: KpiSource::Stored,
            stored_value: Some(value),
            default_value: None,
            current_value: Some(value),
        }
    }

    pub fn calculated(
        id: impl Into<KpiId>,
        game_id: GameId,
        name: impl Into<String>,
        formula: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            game_id,
            name: name.into(),
            unit: String::new(),
            category: String::new(),
            source: KpiSource::Calculated { formula: Formula::new(formula) },
            stored_value: None,
            default_value: None,
            current_value: None,
        }
    }

    pub fn is_calculated(&self) -> bool {
        matches!(self.source, KpiSource::Calculated { .. })
    }

    pub fn formula(&self) -> Option<&Formula> {
        match &self.source {
            KpiSource::Calculated { formula } => Some(formula),
            KpiSource::Stored => None,
        }
    }

    /// Ids referenced by this KPI's formula (empty for stored KPIs).
    pub fn depends_on(&self) -> &[KpiId] {
        self.formula().map(Formula::depends_on).unwrap_or(&[])
    }

    /// Operator-entered value: `stored_value`, then `default_value`, then 0.
    pub fn input_value(&self) -> f64 {
        self.stored_value.or(self.default_value).unwrap_or(0.0)
    }

    /// Replace the formula, recomputing `depends_on`.
    pub fn set_formula(&mut self, text: impl Into<String>) {
        self.source = KpiSource::Calculated { formula: Formula::new(text) };
    }
}

impl From<String> for KpiId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Ordered KPI snapshot with an id index.
#[derive(Clone, Debug, Default)]
pub struct KpiSet {
    kpis: Vec<Kpi>,
    index: FxHashMap<KpiId, usize>,
}

impl KpiSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a KPI. Replacement keeps the original position.
    pub fn insert(&mut self, kpi: Kpi) {
        match self.index.get(&kpi.id) {
            Some(&idx) => self.kpis[idx] = kpi,
            None => {
                self.index.insert(kpi.id.clone(), self.kpis.len());
                self.kpis.push(kpi);
            }
        }
    }

    pub fn get(&self, id: &KpiId) -> Option<&Kpi> {
        self.index.get(id).map(|&idx| &self.kpis[idx])
    }

    pub fn contains(&self, id: &KpiId) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Kpi> {
        self.kpis.iter()
    }

    pub fn calculated(&self) -> impl Iterator<Item = &Kpi> {
        self.kpis.iter().filter(|k| k.is_calculated())
    }

    pub fn len(&self) -> usize {
        self.kpis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kpis.is_empty()
    }
}

impl FromIterator<Kpi> for KpiSet {
    fn from_iter<I: IntoIterator<Item = Kpi>>(iter: I) -> Self {
        let mut set = KpiSet::new();
        for kpi in iter {
            set.insert(kpi);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "00000000-0000-0000-0000-00000000000a";
    const B: &str = "00000000-0000-0000-0000-00000000000b";

    fn game() -> GameId {
        GameId::new("game-1")
    }

    #[test]
    fn test_formula_derives_depends_on() {
        let f = Formula::new(format!("kpi:{A} + kpi:{B} * kpi:{A}"));
        assert_eq!(f.depends_on(), &[KpiId::from(A), KpiId::from(B)]);
    }

    #[test]
    fn test_set_formula_recomputes_depends_on() {
        let mut kpi = Kpi::calculated(B, game(), "B", format!("kpi:{A} * 2"));
        assert_eq!(kpi.depends_on(), &[KpiId::from(A)]);
        kpi.set_formula("3 + 4");
        assert!(kpi.depends_on().is_empty());
    }

    #[test]
    fn test_input_value_fallbacks() {
        let mut kpi = Kpi::stored(A, game(), "A", 10.0);
        assert_eq!(kpi.input_value(), 10.0);
        kpi.stored_value = None;
        kpi.default_value = Some(4.0);
        assert_eq!(kpi.input_value(), 4.0);
        kpi.default_value = None;
        assert_eq!(kpi.input_value(), 0.0);
    }

    #[test]
    fn test_stored_kpi_has_no_formula() {
        let kpi = Kpi::stored(A, game(), "A", 1.0);
        assert!(kpi.formula().is_none());
        assert!(kpi.depends_on().is_empty());
    }

    #[test]
    fn test_serde_roundtrip_recomputes_dependencies() {
        let kpi = Kpi::calculated(B, game(), "B", format!("kpi:{A} * 2"));
        let json = serde_json::to_value(&kpi).unwrap();
        assert_eq!(json["kind"], "calculated");
        assert_eq!(json["formula"], format!("kpi:{A} * 2"));

        let back: Kpi = serde_json::from_value(json).unwrap();
        assert_eq!(back.depends_on(), &[KpiId::from(A)]);
    }

    #[test]
    fn test_stored_kpi_deserializes_without_formula() {
        let json = serde_json::json!({
            "id": A,
            "game_id": "game-1",
            "name": "Revenue",
            "kind": "stored",
            "stored_value": 12.5
        });
        let kpi: Kpi = serde_json::from_value(json).unwrap();
        assert!(!kpi.is_calculated());
        assert_eq!(kpi.input_value(), 12.5);
    }

    #[test]
    fn test_kpi_set_replace_keeps_position() {
        let mut set = KpiSet::new();
        set.insert(Kpi::stored(A, game(), "A", 1.0));
        set.insert(Kpi::stored(B, game(), "B", 2.0));
        set.insert(Kpi::stored(A, game(), "A", 5.0));

        let ids: Vec<&str> = set.iter().map(|k| k.id.as_str()).collect();
        assert_eq!(ids, vec![A, B]);
        assert_eq!(set.get(&KpiId::from(A)).unwrap().input_value(), 5.0);
    }
}
