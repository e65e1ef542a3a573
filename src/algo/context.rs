//! What a run shares with the runs it spawns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::evaluator::{EvaluatorControl, LapBudget};

/// The evaluator control, the clock and the scope of one run.
///
/// A top-level run owns the clock and resets the evaluator control when it
/// starts. A subproblem run shares both and only narrows the free variables
/// and, possibly, the blackbox budget through a [`LapBudget`].
#[derive(Debug, Clone)]
pub struct RunContext {
    evc: Arc<EvaluatorControl>,
    started: Instant,
    lap: Option<Arc<LapBudget>>,
    free_vars: Option<Vec<usize>>,
    top_level: bool,
}

impl RunContext {
    pub fn new(evc: Arc<EvaluatorControl>) -> Self {
        Self {
            evc,
            started: Instant::now(),
            lap: None,
            free_vars: None,
            top_level: true,
        }
    }

    /// A context for a subproblem: same control and clock, restricted
    /// variables and an optional budget of its own.
    pub fn subproblem(&self, free_vars: Vec<usize>, lap: Option<Arc<LapBudget>>) -> Self {
        Self {
            evc: Arc::clone(&self.evc),
            started: self.started,
            lap,
            free_vars: Some(free_vars),
            top_level: false,
        }
    }

    pub fn evc(&self) -> &Arc<EvaluatorControl> {
        &self.evc
    }

    pub fn lap(&self) -> Option<&LapBudget> {
        self.lap.as_deref()
    }

    pub fn free_vars(&self) -> Option<&[usize]> {
        self.free_vars.as_deref()
    }

    pub fn is_top_level(&self) -> bool {
        self.top_level
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Restarts the clock, at the start of a top-level run.
    pub fn restart_clock(&mut self) {
        self.started = Instant::now();
    }
}
