//! Recalculation scheduling (debounced automatic passes plus manual trigger).
//!
//! The scheduler does not own a timer thread. Callers pass the current
//! `Instant` in and poll; this keeps it deterministic under test and lets the
//! host loop decide how to wait.
//!
//! ```text
//! change ──► pending(due = now + quiet) ──► change ──► pending(due = now' + quiet)
//!                                                          │
//!                      poll(now >= due) ◄──────────────────┘
//!                             │
//!                             ▼
//!                      Trigger::Automatic
//! ```

use std::time::{Duration, Instant};

use kpisim_config::Settings;

/// Why a pass is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The quiet period after the last change elapsed.
    Automatic,
    /// "Recalculate now".
    Manual,
}

/// A scheduled automatic pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRecalc {
    pub due: Instant,
}

#[derive(Debug, Clone)]
pub struct RecalcScheduler {
    quiet_period: Duration,
    automatic: bool,
    /// Bumped on every change; a pass only settles the generation it started at.
    generation: u64,
    pending: Option<PendingRecalc>,
    /// Changes seen since the last pass (tracked even with automatic off).
    stale: bool,
}

impl Default for RecalcScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(kpisim_config::settings::DEFAULT_DEBOUNCE_MS))
    }
}

impl RecalcScheduler {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            automatic: true,
            generation: 0,
            pending: None,
            stale: false,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut scheduler = Self::new(settings.debounce());
        scheduler.automatic = settings.auto_recalc;
        scheduler
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    pub fn is_automatic(&self) -> bool {
        self.automatic
    }

    /// Turning automatic recalculation off drops any pending timer.
    pub fn set_automatic(&mut self, automatic: bool) {
        self.automatic = automatic;
        if !automatic {
            self.pending = None;
        }
    }

    /// Record a change to the KPI set.
    ///
    /// Cancels any pending timer and starts a new one due one quiet period
    /// from `now`. Returns the new generation.
    pub fn notify_change(&mut self, now: Instant) -> u64 {
        self.generation += 1;
        self.stale = true;
        if self.automatic {
            self.pending = Some(PendingRecalc {
                due: now + self.quiet_period,
            });
            log::debug!("recalc scheduled (generation {})", self.generation);
        }
        self.generation
    }

    /// Drop the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn pending(&self) -> Option<PendingRecalc> {
        self.pending
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Time left until the pending pass is due (zero if overdue).
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.pending.map(|p| p.due.saturating_duration_since(now))
    }

    /// Claim the automatic pass if its quiet period has elapsed.
    ///
    /// The changes stay stale until the pass reports back through
    /// `pass_succeeded` or `pass_failed`.
    pub fn take_due(&mut self, now: Instant) -> Option<Trigger> {
        match self.pending {
            Some(pending) if now >= pending.due => {
                self.pending = None;
                Some(Trigger::Automatic)
            }
            _ => None,
        }
    }

    /// Claim a pass immediately, cancelling any pending timer.
    pub fn request_now(&mut self) -> Trigger {
        if self.cancel() {
            log::debug!("pending recalc replaced by manual request");
        }
        Trigger::Manual
    }

    /// A pass that started at `generation` completed.
    ///
    /// Changes that arrived while it ran keep the scheduler stale.
    pub fn pass_succeeded(&mut self, generation: u64) {
        if generation == self.generation {
            self.stale = false;
        }
    }

    /// A claimed pass failed before completing.
    ///
    /// Unprocessed changes are retried one quiet period from `now`, unless a
    /// newer change already armed a timer or automatic mode is off.
    pub fn pass_failed(&mut self, now: Instant) {
        if self.stale && self.automatic && self.pending.is_none() {
            self.pending = Some(PendingRecalc {
                due: now + self.quiet_period,
            });
            log::debug!("recalc retry scheduled (generation {})", self.generation);
        }
    }
}
