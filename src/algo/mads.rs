//! # Mads
//!
//! The main loop: evaluate the starting points, then run mega-iterations
//! until a stop condition holds.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use mads::algo::{Mads, Runnable};
//! use mads::eval::BbOutput;
//! use mads::evaluator::{EvaluationError, FnEvaluator};
//! use mads::options::{MadsOptions, Problem};
//! use mads::point::Point;
//!
//! let problem = Problem::builder()
//!     .x0(Point::new(vec![2.0, -1.0]))
//!     .bounds(vec![-5.0; 2], vec![5.0; 2])
//!     .build()
//!     .unwrap();
//! let options = MadsOptions::builder().max_iterations(30).seed(1).build().unwrap();
//! let sphere = FnEvaluator::new(|x: &Point| {
//!     Ok::<_, EvaluationError>(BbOutput::unconstrained(x.coords().iter().map(|c| c * c).sum()))
//! });
//!
//! let mut mads = Mads::new(problem, options, Arc::new(sphere)).unwrap();
//! let result = mads.run().unwrap();
//! assert!(result.best_feasible.unwrap().f().unwrap() < 5.0);
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use super::context::RunContext;
use super::iteration::{IterationEnv, MegaIteration};
use super::{EvalResultConsumer, RunResult, Runnable, TrialPointGenerator};
use crate::error::{MadsError, OptionExt, Result};
use crate::eval::{Barrier, EvalPoint, EvalStatus, StepType, SuccessType};
use crate::evaluator::{Batch, Evaluator, EvaluatorControl, LapBudget};
use crate::mesh::Mesh;
use crate::options::{MadsOptions, Problem, SearchOptions};
use crate::point::Direction;
use crate::poll::{Poll, PollStrategy};
use crate::rng::RandomNumberGenerator;
use crate::search::{ModelSearch, Search, SurrogateModel};
use crate::stop::{BaseStop, IterationStop, MadsStop, StopHandle, StopReason, StopReasons};

pub struct Mads {
    problem: Problem,
    options: MadsOptions,
    ctx: RunContext,
    search: Search,
    poll: Poll,
    mesh: Option<Mesh>,
    barrier: Barrier,
    stop_reasons: StopReasons,
    iteration: usize,
    rng: RandomNumberGenerator,
    last_direction: Option<Direction>,
    fallback_center: Option<EvalPoint>,
    initialized: bool,
    finished: bool,
}

impl fmt::Debug for Mads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mads")
            .field("dimension", &self.problem.get_dimension())
            .field("iteration", &self.iteration)
            .field("search", &self.search)
            .field("poll", &self.poll)
            .field("stop_reasons", &self.stop_reasons)
            .field("free_vars", &self.ctx.free_vars())
            .finish()
    }
}

impl Mads {
    /// Creates a run with its own evaluator control.
    ///
    /// # Errors
    ///
    /// Returns an error if the evaluator control cannot be built.
    pub fn new(problem: Problem, options: MadsOptions, evaluator: Arc<dyn Evaluator>) -> Result<Self> {
        let evc = EvaluatorControl::new(
            evaluator,
            problem.constraints(),
            options.get_evaluator().clone(),
        )?;
        Self::with_control(problem, options, Arc::new(evc))
    }

    /// Creates a run on a shared evaluator control.
    pub fn with_control(
        problem: Problem,
        options: MadsOptions,
        evc: Arc<EvaluatorControl>,
    ) -> Result<Self> {
        if evc.constraints().len() != problem.get_constraint_kinds().len() {
            return Err(MadsError::Configuration(format!(
                "evaluator control expects {} constraint(s), problem declares {}",
                evc.constraints().len(),
                problem.get_constraint_kinds().len()
            )));
        }
        let rng = RandomNumberGenerator::from_seed(options.get_seed());
        Ok(Self::assemble(problem, options, RunContext::new(evc), None, rng))
    }

    /// A run restricted to `ctx.free_vars()`, starting from an existing mesh
    /// and incumbents. The starting points are not evaluated again.
    pub(crate) fn subproblem(
        problem: Problem,
        options: MadsOptions,
        ctx: RunContext,
        mesh: Mesh,
        rng: RandomNumberGenerator,
        incumbents: &[EvalPoint],
    ) -> Self {
        let mut mads = Self::assemble(problem, options, ctx, Some(mesh), rng);
        mads.barrier.insert_all(incumbents);
        mads.fallback_center = mads.barrier.primary_center().cloned();
        mads
    }

    fn assemble(
        problem: Problem,
        options: MadsOptions,
        ctx: RunContext,
        mesh: Option<Mesh>,
        rng: RandomNumberGenerator,
    ) -> Self {
        let search = Search::from_options(options.get_search());
        let poll = Poll::new(options.get_poll_strategy());
        let barrier = Barrier::new(options.get_h_tolerance(), options.get_max_infeasible());
        Self {
            problem,
            options,
            ctx,
            search,
            poll,
            mesh,
            barrier,
            stop_reasons: StopReasons::new(),
            iteration: 0,
            rng,
            last_direction: None,
            fallback_center: None,
            initialized: false,
            finished: false,
        }
    }

    /// Appends a search method after the configured ones.
    pub fn with_search_method(mut self, method: Box<dyn TrialPointGenerator>) -> Self {
        self.search.push(method);
        self
    }

    /// Adds a model search driven by `model`.
    pub fn with_surrogate_model(self, model: Box<dyn SurrogateModel>) -> Self {
        let candidates = self.options.get_search().model_candidates;
        self.with_search_method(Box::new(ModelSearch::new(model, candidates)))
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn options(&self) -> &MadsOptions {
        &self.options
    }

    pub fn evc(&self) -> &Arc<EvaluatorControl> {
        self.ctx.evc()
    }

    /// Handle that stops the run from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.ctx.evc().stop_handle()
    }

    pub fn barrier(&self) -> &Barrier {
        &self.barrier
    }

    /// The mesh, once the run is initialized.
    pub fn mesh(&self) -> Option<&Mesh> {
        self.mesh.as_ref()
    }

    pub fn search(&self) -> &Search {
        &self.search
    }

    pub fn poll_stop_reason(&self) -> StopReason {
        self.poll.stop_reason()
    }

    pub fn stop_reasons(&self) -> &StopReasons {
        &self.stop_reasons
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn last_direction(&self) -> Option<&Direction> {
        self.last_direction.as_ref()
    }

    pub fn best_feasible(&self) -> Option<&EvalPoint> {
        self.barrier.best_feasible()
    }

    pub fn best_infeasible(&self) -> Option<&EvalPoint> {
        self.barrier.best_infeasible()
    }

    fn fail_init(&mut self, err: MadsError) -> MadsError {
        self.stop_reasons.set(BaseStop::InitializationFailed);
        warn!(error = %err, "initialization failed");
        err
    }

    fn check_x0s(&self) -> Result<()> {
        let n = self.problem.get_dimension();
        let bounds = self.problem.get_bounds();
        if self.problem.get_x0s().is_empty() {
            return Err(MadsError::Initialization("no starting point".to_string()));
        }
        for (k, x0) in self.problem.get_x0s().iter().enumerate() {
            if x0.dim() != n {
                return Err(MadsError::Initialization(format!(
                    "starting point {} has dimension {}, expected {}",
                    k,
                    x0.dim(),
                    n
                )));
            }
            if !x0.is_complete() {
                return Err(MadsError::Initialization(format!(
                    "starting point {} has undefined coordinates",
                    k
                )));
            }
            if !bounds.contains(x0) {
                return Err(MadsError::Initialization(format!(
                    "starting point {} lies outside the bounds",
                    k
                )));
            }
        }
        Ok(())
    }

    fn build_mesh(&self) -> Result<Mesh> {
        let n = self.problem.get_dimension();
        let x0 = &self.problem.get_x0s()[0];
        let frame = self.options.frame_size_for(&self.problem, x0)?;
        let mut mesh = Mesh::new(&frame, self.problem.get_granularity())?
            .with_anisotropy(self.options.get_anisotropy());
        if let Some(min_mesh) = self.options.get_min_mesh_size() {
            crate::point::check_dim(n, min_mesh.len())?;
            mesh = mesh.with_min_mesh_size(min_mesh.to_vec());
        }
        if let Some(min_frame) = self.options.get_min_frame_size() {
            crate::point::check_dim(n, min_frame.len())?;
            mesh = mesh.with_min_frame_size(Some(min_frame.to_vec()));
        }
        Ok(mesh)
    }

    /// Evaluates the starting points and fills the barrier.
    fn evaluate_x0s(&mut self) -> Result<()> {
        let points = self
            .problem
            .get_x0s()
            .iter()
            .map(|x0| EvalPoint::new(x0.clone(), StepType::X0))
            .collect();
        let result = self.ctx.evc().run(
            Batch::new(points).opportunistic(false).lap(self.ctx.lap()),
            &mut self.rng,
        );
        if result.stop.terminates() {
            self.stop_reasons.set(result.stop);
        }

        let evaluated: Vec<&EvalPoint> = result
            .points
            .iter()
            .filter(|p| p.status().is_done())
            .collect();
        if !evaluated.is_empty() && evaluated.iter().all(|p| p.status() == EvalStatus::EvalError) {
            self.stop_reasons.set(MadsStop::X0Fail);
            let reason = evaluated
                .first()
                .and_then(|p| p.message())
                .unwrap_or("unknown error")
                .to_string();
            return Err(MadsError::Initialization(format!(
                "every starting point evaluation crashed: {}",
                reason
            )));
        }

        self.barrier.consume(&result.points);
        self.fallback_center = self
            .barrier
            .primary_center()
            .cloned()
            .or_else(|| result.points.iter().find(|p| p.status().is_done()).cloned())
            .or_else(|| result.points.first().cloned());
        info!(
            x0s = result.points.len(),
            feasible = self.barrier.best_feasible().is_some(),
            "starting points evaluated"
        );
        Ok(())
    }

    /// Brings every phase back to `STARTED` for a new run. The mesh, the
    /// barrier and the cache carry over.
    fn begin_run(&mut self) {
        if self.ctx.is_top_level() {
            let evc = self.ctx.evc();
            evc.reset();
            evc.stop_handle().clear();
            self.ctx.restart_clock();
        }
        self.stop_reasons.reset();
        self.iteration = 0;
    }

    fn try_init(&mut self) -> Result<()> {
        if self.mesh.is_none() {
            self.check_x0s().map_err(|e| {
                self.stop_reasons.set(MadsStop::X0Fail);
                e
            })?;
            self.mesh = Some(self.build_mesh()?);
        }
        if self.barrier.is_empty() && self.fallback_center.is_none() {
            self.evaluate_x0s()?;
        }
        Ok(())
    }

    fn mega_iteration(&mut self) -> Result<()> {
        let fallback = self
            .fallback_center
            .clone()
            .ok_or_else_mads(|| MadsError::Initialization("run has no frame center".to_string()))?;
        let mut mesh = self
            .mesh
            .take()
            .ok_or_else_mads(|| MadsError::Initialization("run has no mesh".to_string()))?;
        let k = self.iteration;
        let span = info_span!("mega_iteration", k);
        let _enter = span.enter();

        let mut mega = MegaIteration::new(k, &self.barrier);
        {
            let env = IterationEnv {
                mesh: &mesh,
                bounds: self.problem.get_bounds(),
                evc: self.ctx.evc(),
                last_direction: self.last_direction.as_ref(),
                iteration: k,
                free_vars: self.ctx.free_vars(),
                lap: self.ctx.lap(),
            };
            let outcome = mega.search_and_poll(
                &env,
                &mut self.search,
                &mut self.poll,
                &mut self.barrier,
                &fallback,
                self.options.get_secondary_poll(),
                &mut self.rng,
            );
            if let Some(stop) = outcome.stop {
                self.stop_reasons.set(stop);
            }
        }
        if let Some(direction) = mega.update(&mut mesh, &mut self.barrier) {
            self.last_direction = Some(direction);
        }

        for (name, reason) in self.search.method_stop_reasons() {
            if !reason.is_started() {
                debug!(method = name, reason = reason.name(), "search method");
            }
        }
        let poll_reason = self.poll.stop_reason();
        if poll_reason.is_error() {
            warn!(reason = poll_reason.name(), "poll failed this iteration");
        }
        info!(
            success = ?mega.outcome().success,
            evaluated = mega.outcome().evaluated,
            best_f = ?self.barrier.best_feasible().and_then(EvalPoint::f),
            best_h = ?self.barrier.best_infeasible().and_then(EvalPoint::h),
            frame = ?mesh.frame_sizes(),
            "mega-iteration done"
        );
        self.mesh = Some(mesh);
        Ok(())
    }

    /// Builds a run over `vars` only, starting from this run's incumbents.
    ///
    /// The pollster variant moves every variable on the current mesh with a
    /// single pair of directions and no search; other subproblems start from
    /// a frame one step coarser than the current one.
    pub(crate) fn spawn_subproblem(&mut self, vars: Vec<usize>, pollster: bool) -> Result<Mads> {
        let main_mesh = self
            .mesh
            .as_ref()
            .ok_or_else_mads(|| MadsError::Initialization("run has no mesh".to_string()))?;
        let center = self
            .barrier
            .primary_center()
            .or(self.fallback_center.as_ref())
            .ok_or_else_mads(|| MadsError::Initialization("run has no frame center".to_string()))?
            .point()
            .clone();
        let decomposition = self.options.get_decomposition().clone();

        let mut mesh = main_mesh.clone();
        let mut options = self.options.clone();
        if pollster {
            options.set_max_iterations(Some(1));
            options.set_poll_strategy(PollStrategy::Double);
            options.set_search(SearchOptions {
                speculative: false,
                latin_hypercube: None,
                nelder_mead: None,
                ..self.options.get_search().clone()
            });
        } else {
            mesh.enlarge(None);
            options.set_max_iterations(decomposition.subproblem_max_iterations);
        }

        let mut problem = self.problem.clone();
        problem.set_x0s(vec![center]);
        let lap = decomposition
            .subproblem_max_bb_eval
            .filter(|_| !pollster)
            .map(|limit| Arc::new(LapBudget::subproblem(limit)));
        let ctx = self.ctx.subproblem(vars, lap);
        let incumbents: Vec<EvalPoint> = self.barrier.incumbents().cloned().collect();
        let rng = self.rng.fork();
        Ok(Mads::subproblem(problem, options, ctx, mesh, rng, &incumbents))
    }

    /// Folds the incumbents of a finished subproblem into this run's barrier.
    pub(crate) fn absorb(&mut self, result: &RunResult) -> SuccessType {
        let points: Vec<&EvalPoint> = result
            .best_feasible
            .iter()
            .chain(result.best_infeasible.iter())
            .collect();
        let success = self.barrier.insert_all(points.iter().copied());
        if let Some(center) = self.barrier.primary_center() {
            self.fallback_center = Some(center.clone());
        }
        success
    }

    /// Starts a new main mega-iteration and returns its counter.
    pub(crate) fn begin_iteration(&mut self) -> MegaIteration {
        self.iteration += 1;
        MegaIteration::new(self.iteration, &self.barrier)
    }

    /// Updates the main mesh from what the subproblems brought.
    pub(crate) fn update_mesh(&mut self, mega: &mut MegaIteration) -> Result<()> {
        let mesh = self
            .mesh
            .as_mut()
            .ok_or_else_mads(|| MadsError::Initialization("run has no mesh".to_string()))?;
        if let Some(direction) = mega.update(mesh, &mut self.barrier) {
            self.last_direction = Some(direction);
        }
        Ok(())
    }

    pub(crate) fn record_stop(&mut self, cause: impl Into<StopReason>) {
        self.stop_reasons.set(cause);
    }

    pub(crate) fn rng_mut(&mut self) -> &mut RandomNumberGenerator {
        &mut self.rng
    }

    /// Closes the run; the next `init` starts a fresh one.
    pub(crate) fn finish_run(&mut self) -> RunResult {
        self.finished = true;
        self.result()
    }

    pub(crate) fn result(&self) -> RunResult {
        RunResult {
            best_feasible: self.barrier.best_feasible().cloned(),
            best_infeasible: self.barrier.best_infeasible().cloned(),
            stop_reasons: self.stop_reasons.clone(),
            final_reason: self.stop_reasons.final_reason(),
            iterations: self.iteration,
            bb_evals: self.ctx.evc().bb_evals(),
            evals: self.ctx.evc().evals(),
            mesh: self.mesh.clone(),
        }
    }
}

impl Runnable for Mads {
    /// Validates the starting points, builds the mesh and evaluates the
    /// starting points. After a finished run, only resets the stop reasons
    /// and counters so that the next run continues from the current mesh.
    ///
    /// # Errors
    ///
    /// Returns [`MadsError::Initialization`] when a starting point is
    /// invalid or every starting point evaluation crashed, and the mesh
    /// errors for an invalid frame size configuration.
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            if self.finished {
                self.finished = false;
                self.begin_run();
            }
            return Ok(());
        }
        self.begin_run();
        match self.try_init() {
            Ok(()) => {
                self.initialized = true;
                Ok(())
            }
            Err(e) => Err(self.fail_init(e)),
        }
    }

    fn run(&mut self) -> Result<RunResult> {
        self.init()?;
        let span = info_span!("mads", n = self.problem.get_dimension(), sub = !self.ctx.is_top_level());
        let _enter = span.enter();

        while !self.termination_check() {
            self.iteration += 1;
            self.mega_iteration()?;
        }

        let result = self.finish_run();
        info!(
            reason = %result.final_reason,
            iterations = result.iterations,
            bb_evals = result.bb_evals,
            "run finished"
        );
        Ok(result)
    }

    fn termination_check(&mut self) -> bool {
        let evc = Arc::clone(self.ctx.evc());
        if let Some(cause) = evc.stop_handle().requested() {
            self.stop_reasons.set(cause);
        }
        if let Some(max_time) = self.options.get_max_time() {
            if self.ctx.elapsed() >= max_time {
                self.stop_reasons.set(BaseStop::MaxTimeReached);
            }
        }
        let global = evc.global_stop_reason();
        if global.terminates() {
            self.stop_reasons.set(global);
        }
        if let Some(lap) = self.ctx.lap() {
            if lap.is_exhausted() {
                self.stop_reasons.set(lap.cause());
            }
        }
        if let Some(mesh) = &self.mesh {
            if let Some(cause) = mesh.check_for_stopping(self.ctx.free_vars()) {
                self.stop_reasons.set(cause);
            }
        }
        if let Some(max) = self.options.get_max_iterations() {
            if self.iteration >= max {
                self.stop_reasons.set(IterationStop::MaxIterReached);
            }
        }
        if self.options.get_stop_if_feasible() && self.barrier.best_feasible().is_some() {
            self.stop_reasons.set(IterationStop::StopOnFeas);
        }
        self.stop_reasons.check_terminate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{BbOutput, ConstraintKind};
    use crate::evaluator::{EvaluationError, FnEvaluator};
    use crate::point::Point;
    use crate::stop::{EvalGlobalStop, Phase};

    fn sphere() -> Arc<dyn Evaluator> {
        Arc::new(FnEvaluator::new(|x: &Point| {
            Ok::<_, EvaluationError>(BbOutput::unconstrained(
                x.coords().iter().map(|c| (c - 1.0) * (c - 1.0)).sum(),
            ))
        }))
    }

    fn problem(x0: Vec<f64>) -> Problem {
        let n = x0.len();
        Problem::builder()
            .x0(Point::new(x0))
            .bounds(vec![-10.0; n], vec![10.0; n])
            .build()
            .unwrap()
    }

    #[test]
    fn test_converges_on_sphere() {
        let options = MadsOptions::builder().seed(3).max_iterations(200).build().unwrap();
        let mut mads = Mads::new(problem(vec![-3.0, 4.0]), options, sphere()).unwrap();
        let result = mads.run().unwrap();

        let best = result.best_feasible.as_ref().unwrap();
        assert!(best.f().unwrap() < 1e-3, "f = {:?}", best.f());
        assert!(result.final_reason.terminates());
        assert!(!result.is_error());
    }

    #[test]
    fn test_max_iterations() {
        let options = MadsOptions::builder().max_iterations(3).build().unwrap();
        let mut mads = Mads::new(problem(vec![5.0]), options, sphere()).unwrap();
        let result = mads.run().unwrap();
        assert_eq!(result.iterations, 3);
        assert!(result.final_reason.is(IterationStop::MaxIterReached));
    }

    #[test]
    fn test_stop_if_feasible() {
        let eval: Arc<dyn Evaluator> = Arc::new(FnEvaluator::new(|x: &Point| {
            Ok::<_, EvaluationError>(BbOutput::new(x[0], vec![x[0] - 1.0]))
        }));
        let problem = Problem::builder()
            .x0(Point::new(vec![6.0]))
            .bounds(vec![-10.0], vec![10.0])
            .constraint_kinds(vec![ConstraintKind::Progressive])
            .build()
            .unwrap();
        let options = MadsOptions::builder()
            .stop_if_feasible(true)
            .max_iterations(100)
            .build()
            .unwrap();
        let mut mads = Mads::new(problem, options, eval).unwrap();
        let result = mads.run().unwrap();
        assert!(result.final_reason.is(IterationStop::StopOnFeas));
        assert!(result.best_feasible.unwrap().point()[0] <= 1.0);
    }

    #[test]
    fn test_x0_outside_bounds_is_fatal() {
        let problem = Problem::builder()
            .x0(Point::new(vec![20.0]))
            .bounds(vec![-10.0], vec![10.0])
            .build()
            .unwrap();
        let mut mads = Mads::new(problem, MadsOptions::default(), sphere()).unwrap();
        assert!(matches!(mads.run(), Err(MadsError::Initialization(_))));
        assert!(mads.stop_reasons().get(Phase::Base).is(BaseStop::InitializationFailed));
        assert!(mads.stop_reasons().get(Phase::Mads).is(MadsStop::X0Fail));
    }

    #[test]
    fn test_crashing_x0_is_fatal() {
        let eval: Arc<dyn Evaluator> = Arc::new(FnEvaluator::new(|_: &Point| {
            Err::<BbOutput, _>(EvaluationError::Crashed("segfault".to_string()))
        }));
        let mut mads = Mads::new(problem(vec![0.0]), MadsOptions::default(), eval).unwrap();
        let err = mads.run().unwrap_err();
        assert!(err.to_string().contains("segfault"));
        assert!(mads.stop_reasons().get(Phase::Base).is(BaseStop::InitializationFailed));
        assert!(mads.stop_reasons().final_reason().is(MadsStop::X0Fail));
    }

    #[test]
    fn test_budget_stops_run() {
        let evaluator = crate::options::EvaluatorOptions::builder()
            .max_bb_eval(7)
            .build()
            .unwrap();
        let options = MadsOptions::builder().evaluator(evaluator).build().unwrap();
        let mut mads = Mads::new(problem(vec![5.0, 5.0]), options, sphere()).unwrap();
        let result = mads.run().unwrap();
        assert_eq!(result.bb_evals, 7);
        assert!(result.final_reason.is(EvalGlobalStop::MaxBbEvalReached));
    }

    #[test]
    fn test_stop_handle_before_run() {
        let mut mads = Mads::new(problem(vec![5.0]), MadsOptions::default(), sphere()).unwrap();
        mads.init().unwrap();
        mads.stop_handle().request_stop();
        let result = mads.run().unwrap();
        assert_eq!(result.iterations, 0);
        assert!(result.final_reason.is(BaseStop::UserStopped));
    }
}
