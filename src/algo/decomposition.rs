//! # Space decomposition
//!
//! Two algorithms that split the variables into small subproblems, each
//! solved by a [`Mads`] run restricted to its variables. Subproblem runs
//! share the evaluator control, and therefore the cache and the global
//! budgets, of the main run. Their incumbents are folded back into the main
//! barrier and the main mesh is updated from what they brought.
//!
//! - [`SsdMads`] solves the subproblems one after the other.
//! - [`PsdMads`] solves them concurrently, next to a *pollster* that polls
//!   every variable on the main mesh.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, info_span, warn};

use super::iteration::StepOutcome;
use super::{Mads, RunResult, Runnable};
use crate::error::{MadsError, Result};
use crate::eval::{EvalPoint, SuccessType};
use crate::evaluator::{Evaluator, EvaluatorControl};
use crate::options::{DecompositionOptions, MadsOptions, Problem};
use crate::stop::DecompositionStop;

fn validate(problem: &Problem, options: &DecompositionOptions) -> Result<()> {
    if options.subproblem_dimension == 0 {
        return Err(MadsError::Configuration(
            "subproblem dimension must be positive".to_string(),
        ));
    }
    if !(options.coverage_percent > 0.0 && options.coverage_percent <= 100.0) {
        return Err(MadsError::Configuration(format!(
            "coverage percent must be in (0, 100], got {}",
            options.coverage_percent
        )));
    }
    if options.subproblems == Some(0) {
        return Err(MadsError::Configuration(
            "at least one subproblem per mega-iteration is required".to_string(),
        ));
    }
    if problem.get_dimension() == 0 {
        return Err(MadsError::Configuration("problem has no variable".to_string()));
    }
    Ok(())
}

/// What one subproblem brought to the main barrier.
fn absorbed(main: &mut Mads, result: &RunResult, bb_before: usize) -> StepOutcome {
    let success = main.absorb(result);
    StepOutcome {
        success,
        best: if success >= SuccessType::PartialSuccess {
            main.barrier().primary_center().cloned()
        } else {
            None
        },
        stop: None,
        evaluated: main.evc().bb_evals().saturating_sub(bb_before),
    }
}

fn init_main(main: &mut Mads) -> Result<()> {
    main.init().map_err(|e| {
        main.record_stop(DecompositionStop::X0Fail);
        e
    })
}

fn finish(main: &mut Mads, name: &str) -> RunResult {
    let result = main.finish_run();
    info!(
        algorithm = name,
        reason = %result.final_reason,
        iterations = result.iterations,
        bb_evals = result.bb_evals,
        best_f = ?result.best_feasible.as_ref().and_then(EvalPoint::f),
        "run finished"
    );
    result
}

/// Sequential space decomposition.
///
/// Every mega-iteration draws a random partition of the variables into
/// blocks of `subproblem_dimension` and solves one subproblem per block,
/// starting each from the current main incumbent.
#[derive(Debug)]
pub struct SsdMads {
    main: Mads,
    options: DecompositionOptions,
}

impl SsdMads {
    /// # Errors
    ///
    /// Returns [`MadsError::Configuration`] for an invalid decomposition
    /// setting.
    pub fn new(problem: Problem, options: MadsOptions, evc: Arc<EvaluatorControl>) -> Result<Self> {
        let decomposition = options.get_decomposition().clone();
        validate(&problem, &decomposition)?;
        Ok(Self {
            main: Mads::with_control(problem, options, evc)?,
            options: decomposition,
        })
    }

    /// Creates a run with its own evaluator control.
    pub fn with_evaluator(
        problem: Problem,
        options: MadsOptions,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Self> {
        let evc = EvaluatorControl::new(
            evaluator,
            problem.constraints(),
            options.get_evaluator().clone(),
        )?;
        Self::new(problem, options, Arc::new(evc))
    }

    /// The main run, which owns the mesh, the barrier and the stop reasons.
    pub fn main(&self) -> &Mads {
        &self.main
    }

    /// Blocks of variables for one pass.
    fn partition(&mut self) -> Vec<Vec<usize>> {
        let n = self.main.problem().get_dimension();
        let dim = self.options.subproblem_dimension.min(n);
        let order = self.main.rng_mut().permutation(n);
        let mut blocks: Vec<Vec<usize>> = order
            .chunks(dim)
            .map(|chunk| {
                let mut vars = chunk.to_vec();
                vars.sort_unstable();
                vars
            })
            .collect();
        if let Some(limit) = self.options.subproblems {
            blocks.truncate(limit);
        }
        blocks
    }

    fn mega_iteration(&mut self) -> Result<()> {
        let blocks = self.partition();
        let mut mega = self.main.begin_iteration();
        let span = info_span!("ssd_mega_iteration", k = mega.k());
        let _enter = span.enter();

        for vars in blocks {
            if self.main.evc().dispatch_blocked() {
                break;
            }
            let bb_before = self.main.evc().bb_evals();
            let mut sub = self.main.spawn_subproblem(vars.clone(), false)?;
            match sub.run() {
                Ok(result) => {
                    let outcome = absorbed(&mut self.main, &result, bb_before);
                    debug!(
                        ?vars,
                        success = ?outcome.success,
                        reason = %result.final_reason,
                        "subproblem done"
                    );
                    let full = outcome.success == SuccessType::FullSuccess;
                    mega.record(outcome);
                    if full && self.options.opportunistic {
                        break;
                    }
                }
                Err(e) => {
                    warn!(?vars, error = %e, "subproblem failed");
                    self.main.record_stop(DecompositionStop::SubproblemFail);
                    break;
                }
            }
        }

        self.main.update_mesh(&mut mega)?;
        info!(
            success = ?mega.outcome().success,
            evaluated = mega.outcome().evaluated,
            best_f = ?self.main.best_feasible().and_then(EvalPoint::f),
            "mega-iteration done"
        );
        Ok(())
    }
}

impl Runnable for SsdMads {
    fn init(&mut self) -> Result<()> {
        init_main(&mut self.main)
    }

    fn run(&mut self) -> Result<RunResult> {
        self.init()?;
        let span = info_span!("ssd_mads", n = self.main.problem().get_dimension());
        let _enter = span.enter();

        while !self.termination_check() {
            self.mega_iteration()?;
        }
        Ok(finish(&mut self.main, "SSD-MADS"))
    }

    fn termination_check(&mut self) -> bool {
        self.main.termination_check()
    }
}

/// Parallel space decomposition.
///
/// Every mega-iteration runs, concurrently, a pollster over all variables
/// on the main mesh and a set of subproblems whose variables are picked at
/// random among those not covered yet. The main mesh is updated once a
/// subproblem brings a full success or enough of the variables have been
/// covered since the last update.
#[derive(Debug)]
pub struct PsdMads {
    main: Mads,
    options: DecompositionOptions,
    /// Variables not handed to a subproblem since the pool was last filled.
    pool: Vec<usize>,
    covered: HashSet<usize>,
    pending: StepOutcome,
}

impl PsdMads {
    /// # Errors
    ///
    /// Returns [`MadsError::Configuration`] for an invalid decomposition
    /// setting.
    pub fn new(problem: Problem, options: MadsOptions, evc: Arc<EvaluatorControl>) -> Result<Self> {
        let decomposition = options.get_decomposition().clone();
        validate(&problem, &decomposition)?;
        Ok(Self {
            main: Mads::with_control(problem, options, evc)?,
            options: decomposition,
            pool: Vec::new(),
            covered: HashSet::new(),
            pending: StepOutcome::default(),
        })
    }

    /// Creates a run with its own evaluator control.
    pub fn with_evaluator(
        problem: Problem,
        options: MadsOptions,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Self> {
        let evc = EvaluatorControl::new(
            evaluator,
            problem.constraints(),
            options.get_evaluator().clone(),
        )?;
        Self::new(problem, options, Arc::new(evc))
    }

    pub fn main(&self) -> &Mads {
        &self.main
    }

    fn subproblem_count(&self) -> usize {
        let n = self.main.problem().get_dimension();
        self.options
            .subproblems
            .unwrap_or_else(|| n.div_ceil(self.options.subproblem_dimension.min(n)))
    }

    /// Draws distinct variables from the pool, refilling it with a fresh
    /// permutation when it runs dry.
    fn pick_variables(&mut self) -> Vec<usize> {
        let n = self.main.problem().get_dimension();
        let dim = self.options.subproblem_dimension.min(n);
        let mut vars = Vec::with_capacity(dim);
        while vars.len() < dim {
            match self.pool.pop() {
                Some(v) if !vars.contains(&v) => vars.push(v),
                Some(_) => {}
                None => self.pool = self.main.rng_mut().permutation(n),
            }
        }
        vars.sort_unstable();
        vars
    }

    fn coverage_reached(&self) -> bool {
        let n = self.main.problem().get_dimension() as f64;
        self.covered.len() as f64 >= self.options.coverage_percent / 100.0 * n
    }

    fn mega_iteration(&mut self) -> Result<()> {
        let n = self.main.problem().get_dimension();
        let mut mega = self.main.begin_iteration();
        let span = info_span!("psd_mega_iteration", k = mega.k());
        let _enter = span.enter();

        let mut runs: Vec<(Option<Vec<usize>>, Mads)> = Vec::new();
        runs.push((None, self.main.spawn_subproblem((0..n).collect(), true)?));
        for _ in 0..self.subproblem_count() {
            let vars = self.pick_variables();
            let sub = self.main.spawn_subproblem(vars.clone(), false)?;
            runs.push((Some(vars), sub));
        }

        let bb_before = self.main.evc().bb_evals();
        let finished: Vec<(Option<Vec<usize>>, Result<RunResult>)> = thread::scope(|scope| {
            let handles: Vec<_> = runs
                .into_iter()
                .map(|(vars, mut sub)| (vars, scope.spawn(move || sub.run())))
                .collect();
            handles
                .into_iter()
                .map(|(vars, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(MadsError::Other("subproblem thread panicked".to_string()))
                    });
                    (vars, result)
                })
                .collect()
        });

        let mut opportunistic_success = false;
        for (vars, result) in finished {
            match result {
                Ok(result) => {
                    let outcome = absorbed(&mut self.main, &result, bb_before);
                    debug!(
                        pollster = vars.is_none(),
                        ?vars,
                        success = ?outcome.success,
                        reason = %result.final_reason,
                        "subproblem done"
                    );
                    if let Some(vars) = vars {
                        opportunistic_success |= outcome.success == SuccessType::FullSuccess;
                        self.covered.extend(vars);
                    }
                    self.pending.merge(StepOutcome { evaluated: 0, ..outcome });
                }
                Err(e) => {
                    warn!(?vars, error = %e, "subproblem failed");
                    self.main.record_stop(DecompositionStop::SubproblemFail);
                }
            }
        }
        self.pending.evaluated += self.main.evc().bb_evals().saturating_sub(bb_before);

        if opportunistic_success || self.coverage_reached() {
            mega.record(std::mem::take(&mut self.pending));
            self.main.update_mesh(&mut mega)?;
            self.covered.clear();
            info!(
                success = ?mega.outcome().success,
                evaluated = mega.outcome().evaluated,
                best_f = ?self.main.best_feasible().and_then(EvalPoint::f),
                "main mesh updated"
            );
        } else {
            debug!(covered = self.covered.len(), "coverage not reached, mesh kept");
        }
        Ok(())
    }
}

impl Runnable for PsdMads {
    fn init(&mut self) -> Result<()> {
        init_main(&mut self.main)
    }

    fn run(&mut self) -> Result<RunResult> {
        self.init()?;
        let span = info_span!("psd_mads", n = self.main.problem().get_dimension());
        let _enter = span.enter();

        while !self.termination_check() {
            self.mega_iteration()?;
        }
        Ok(finish(&mut self.main, "PSD-MADS"))
    }

    fn termination_check(&mut self) -> bool {
        self.main.termination_check()
    }
}
