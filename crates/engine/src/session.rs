//! Editing session for one game's KPIs.
//!
//! Binds a repository, a game and a scheduler. Formula edits are persisted
//! immediately and schedule a debounced pass; `poll` runs it when due and
//! `recalculate_now` runs one on demand.

use std::time::Instant;

use crate::dep_graph::DepGraph;
use crate::error::EngineError;
use crate::formula::editor;
use crate::formula::TokenKind;
use crate::kpi::{Formula, GameId, Kpi, KpiId, KpiSet};
use crate::pass::run_pass;
use crate::recalc::RecalcReport;
use crate::repository::KpiRepository;
use crate::scheduler::{RecalcScheduler, Trigger};

pub struct EngineSession<R: KpiRepository> {
    repo: R,
    game: GameId,
    scheduler: RecalcScheduler,
    last_report: Option<RecalcReport>,
}

impl<R: KpiRepository> EngineSession<R> {
    pub fn new(repo: R, game: GameId, scheduler: RecalcScheduler) -> Self {
        Self {
            repo,
            game,
            scheduler,
            last_report: None,
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn repo_mut(&mut self) -> &mut R {
        &mut self.repo
    }

    pub fn into_repo(self) -> R {
        self.repo
    }

    pub fn game(&self) -> &GameId {
        &self.game
    }

    pub fn scheduler(&self) -> &RecalcScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut RecalcScheduler {
        &mut self.scheduler
    }

    /// Report of the most recent pass. Circular warnings stay here until a
    /// later pass clears them.
    pub fn last_report(&self) -> Option<&RecalcReport> {
        self.last_report.as_ref()
    }

    pub fn circular(&self) -> &[KpiId] {
        self.last_report.as_ref().map_or(&[], |r| r.circular.as_slice())
    }

    /// Record an external change to the KPI set (create, delete, value edit).
    pub fn notify_change(&mut self, now: Instant) {
        self.scheduler.notify_change(now);
    }

    /// Run a pass immediately, cancelling any pending automatic one.
    ///
    /// On failure the changes stay stale; call again to retry.
    pub fn recalculate_now(&mut self) -> Result<&RecalcReport, EngineError> {
        let trigger = self.scheduler.request_now();
        self.run(trigger, None)
    }

    /// Run the automatic pass if its quiet period has elapsed.
    ///
    /// A pass that fails is rescheduled one quiet period after `now`.
    pub fn poll(&mut self, now: Instant) -> Result<Option<&RecalcReport>, EngineError> {
        match self.scheduler.take_due(now) {
            Some(trigger) => self.run(trigger, Some(now)).map(Some),
            None => Ok(None),
        }
    }

    fn run(&mut self, trigger: Trigger, now: Option<Instant>) -> Result<&RecalcReport, EngineError> {
        log::debug!("{:?} recalc for game {}", trigger, self.game);
        let generation = self.scheduler.generation();
        match run_pass(&mut self.repo, &self.game) {
            Ok(report) => {
                self.scheduler.pass_succeeded(generation);
                Ok(self.last_report.insert(report))
            }
            Err(error) => {
                log::warn!("{:?} recalc for game {} failed: {}", trigger, self.game, error);
                if let Some(now) = now {
                    self.scheduler.pass_failed(now);
                }
                Err(error)
            }
        }
    }

    /// Replace a calculated KPI's formula.
    ///
    /// `depends_on` is recomputed from the new text. A formula that closes a
    /// loop is still saved; the loop is logged here and flagged by the next
    /// pass.
    pub fn set_formula(&mut self, kpi: &KpiId, text: &str, now: Instant) -> Result<(), EngineError> {
        let kpis = self.load()?;
        let target = calculated(&kpis, kpi)?;

        let formula = Formula::new(text);
        let graph = DepGraph::from_kpis(&kpis);
        if let Some(cycle) = graph.would_create_cycle(&target.id, formula.depends_on()) {
            log::warn!("formula for {} '{}': {}", target.name, text, cycle);
        }

        self.repo.update_kpi_formula(kpi, formula.text(), formula.depends_on())?;
        self.scheduler.notify_change(now);
        Ok(())
    }

    /// Delete the token at `index` from the KPI's formula. Returns the new text.
    pub fn delete_token(&mut self, kpi: &KpiId, index: usize, now: Instant) -> Result<String, EngineError> {
        let current = self.formula_text(kpi)?;
        let edited = editor::delete_token(&current, index)?;
        self.set_formula(kpi, &edited, now)?;
        Ok(edited)
    }

    /// Drag the token at `from` to `to`. Returns the new text.
    pub fn move_token(&mut self, kpi: &KpiId, from: usize, to: usize, now: Instant) -> Result<String, EngineError> {
        let current = self.formula_text(kpi)?;
        let edited = editor::move_token(&current, from, to)?;
        self.set_formula(kpi, &edited, now)?;
        Ok(edited)
    }

    /// Insert `token` before `index`. Returns the new text.
    pub fn insert_token(
        &mut self,
        kpi: &KpiId,
        index: usize,
        token: &TokenKind,
        now: Instant,
    ) -> Result<String, EngineError> {
        let current = self.formula_text(kpi)?;
        let edited = editor::insert_token(&current, index, token)?;
        self.set_formula(kpi, &edited, now)?;
        Ok(edited)
    }

    /// Calculated KPIs whose value can change when `kpi` changes.
    pub fn affected_by(&self, kpi: &KpiId) -> Result<Vec<KpiId>, EngineError> {
        let kpis = self.load()?;
        Ok(DepGraph::from_kpis(&kpis).transitive_dependents(kpi))
    }

    /// The KPI's formula rendered with names instead of ids.
    pub fn display_formula(&self, kpi: &KpiId) -> Result<String, EngineError> {
        let kpis = self.load()?;
        let target = calculated(&kpis, kpi)?;
        let text = target.formula().map(Formula::text).unwrap_or_default();
        Ok(editor::display_formula(text, &kpis))
    }

    fn formula_text(&self, kpi: &KpiId) -> Result<String, EngineError> {
        let kpis = self.load()?;
        let target = calculated(&kpis, kpi)?;
        Ok(target.formula().map(|f| f.text().to_string()).unwrap_or_default())
    }

    fn load(&self) -> Result<KpiSet, EngineError> {
        Ok(self.repo.list_kpis(&self.game)?.into_iter().collect())
    }
}

fn calculated<'a>(kpis: &'a KpiSet, id: &KpiId) -> Result<&'a Kpi, EngineError> {
    let kpi = kpis.get(id).ok_or_else(|| EngineError::UnknownKpi(id.clone()))?;
    if !kpi.is_calculated() {
        return Err(EngineError::NotCalculated(id.clone()));
    }
    Ok(kpi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::editor::EditError;
    use crate::formula::{tokenize, Operator};
    use crate::repository::InMemoryRepository;
    use std::time::Duration;

    const A: &str = "00000000-0000-4000-8000-00000000000a";
    const B: &str = "00000000-0000-4000-8000-00000000000b";
    const C: &str = "00000000-0000-4000-8000-00000000000c";

    fn id(s: &str) -> KpiId {
        KpiId::from(s)
    }

    fn session() -> EngineSession<InMemoryRepository> {
        let game = GameId::new("g");
        let repo = InMemoryRepository::with_kpis([
            Kpi::stored(A, game.clone(), "Revenue", 10.0),
            Kpi::stored(B, game.clone(), "Costs", 4.0),
            Kpi::calculated(C, game.clone(), "Profit", format!("kpi:{A} - kpi:{B}")),
        ]);
        EngineSession::new(repo, game, RecalcScheduler::new(Duration::from_millis(3500)))
    }

    fn current(session: &EngineSession<InMemoryRepository>, kpi: &str) -> Option<f64> {
        session.repo().get(&id(kpi)).and_then(|k| k.current_value)
    }

    #[test]
    fn test_recalculate_now() {
        let mut session = session();
        let report = session.recalculate_now().unwrap();
        assert_eq!(report.written, vec![id(C)]);
        assert_eq!(current(&session, C), Some(6.0));
        assert!(session.last_report().is_some());
    }

    #[test]
    fn test_edit_then_debounced_pass() {
        let t0 = Instant::now();
        let mut session = session();
        session.recalculate_now().unwrap();

        session.set_formula(&id(C), &format!("kpi:{A} * 2"), t0).unwrap();
        let kpi = session.repo().get(&id(C)).unwrap();
        assert_eq!(kpi.depends_on(), &[id(A)]);

        // not yet due
        assert!(session.poll(t0 + Duration::from_millis(1000)).unwrap().is_none());
        assert_eq!(current(&session, C), Some(6.0));

        let report = session.poll(t0 + Duration::from_millis(3500)).unwrap().unwrap();
        assert_eq!(report.written, vec![id(C)]);
        assert_eq!(current(&session, C), Some(20.0));
    }

    #[test]
    fn test_rapid_edits_coalesce() {
        let t0 = Instant::now();
        let mut session = session();
        session.set_formula(&id(C), "1", t0).unwrap();
        session.set_formula(&id(C), "2", t0 + Duration::from_millis(3000)).unwrap();

        assert!(session.poll(t0 + Duration::from_millis(3500)).unwrap().is_none());
        assert!(session.poll(t0 + Duration::from_millis(6500)).unwrap().is_some());
        assert_eq!(current(&session, C), Some(2.0));
        assert!(session.poll(t0 + Duration::from_millis(20_000)).unwrap().is_none());
    }

    #[test]
    fn test_failed_automatic_pass_is_retried() {
        let t0 = Instant::now();
        let mut session = session();
        session.set_formula(&id(C), "7", t0).unwrap();
        session.repo_mut().fail_next_fetches(1);

        let due = t0 + Duration::from_millis(3500);
        assert!(session.poll(due).is_err());
        assert!(session.scheduler().is_stale());
        assert_eq!(
            session.scheduler().time_until_due(due),
            Some(Duration::from_millis(3500))
        );

        let report = session.poll(t0 + Duration::from_secs(60)).unwrap().unwrap();
        assert_eq!(report.written, vec![id(C)]);
        assert_eq!(current(&session, C), Some(7.0));
        assert!(!session.scheduler().is_stale());
    }

    #[test]
    fn test_failed_manual_pass_stays_stale() {
        let t0 = Instant::now();
        let mut session = session();
        session.set_formula(&id(C), "7", t0).unwrap();
        session.repo_mut().fail_next_fetches(1);

        assert!(session.recalculate_now().is_err());
        assert!(session.scheduler().is_stale());
        assert!(session.recalculate_now().is_ok());
        assert!(!session.scheduler().is_stale());
        assert_eq!(current(&session, C), Some(7.0));
    }

    #[test]
    fn test_delete_token_persists() {
        let t0 = Instant::now();
        let mut session = session();
        // Revenue - Costs -> delete "-" and "Costs"
        let text = session.delete_token(&id(C), 2, t0).unwrap();
        let text2 = session.delete_token(&id(C), 1, t0).unwrap();
        assert_eq!(text, format!("kpi:{A} -"));
        assert_eq!(text2, format!("kpi:{A}"));
        assert_eq!(session.repo().get(&id(C)).unwrap().depends_on(), &[id(A)]);

        session.recalculate_now().unwrap();
        assert_eq!(current(&session, C), Some(10.0));
    }

    #[test]
    fn test_move_and_insert_token() {
        let t0 = Instant::now();
        let mut session = session();
        // [A, -, B] -> [B, A, -] -> [B, -, A]
        session.move_token(&id(C), 2, 0, t0).unwrap();
        let moved = session.move_token(&id(C), 1, 2, t0).unwrap();
        let tokens = tokenize(&moved);
        assert_eq!(tokens[0].kind, TokenKind::reference(B));
        assert_eq!(tokens[1].kind, TokenKind::Operator(Operator::Minus));
        assert_eq!(tokens[2].kind, TokenKind::reference(A));

        session
            .insert_token(&id(C), 3, &TokenKind::Operator(Operator::Star), t0)
            .unwrap();
        let inserted = session.insert_token(&id(C), 4, &TokenKind::literal("2"), t0).unwrap();
        assert_eq!(tokenize(&inserted).len(), 5);

        session.recalculate_now().unwrap();
        // Costs - Revenue * 2
        assert_eq!(current(&session, C), Some(4.0 - 20.0));
    }

    #[test]
    fn test_edit_errors() {
        let t0 = Instant::now();
        let mut session = session();
        assert_eq!(
            session.delete_token(&id(C), 9, t0),
            Err(EngineError::Edit(EditError::IndexOutOfRange { index: 9, len: 3 }))
        );
        assert_eq!(
            session.set_formula(&id(A), "1", t0),
            Err(EngineError::NotCalculated(id(A)))
        );
        assert_eq!(
            session.set_formula(&id("nope"), "1", t0),
            Err(EngineError::UnknownKpi(id("nope")))
        );
        // failed edits schedule nothing
        assert!(session.scheduler().pending().is_none());
    }

    #[test]
    fn test_circular_warning_persists_until_fixed() {
        let t0 = Instant::now();
        let mut session = session();
        session.set_formula(&id(C), &format!("kpi:{C} + 1"), t0).unwrap();
        session.recalculate_now().unwrap();
        assert_eq!(session.circular(), &[id(C)]);

        session.set_formula(&id(C), &format!("kpi:{A}"), t0).unwrap();
        // still visible while the fix is pending
        assert_eq!(session.circular(), &[id(C)]);
        session.recalculate_now().unwrap();
        assert!(session.circular().is_empty());
    }

    #[test]
    fn test_display_and_affected() {
        let session = session();
        assert_eq!(session.display_formula(&id(C)).unwrap(), "Revenue - Costs");
        assert_eq!(session.affected_by(&id(A)).unwrap(), vec![id(C)]);
    }
}
