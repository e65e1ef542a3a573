//! # Iterations
//!
//! An [`Iteration`] works around one frame center and walks through
//! `Init -> Search -> Poll -> Update`. A [`MegaIteration`] runs the primary
//! iteration around the best incumbent and, when both a feasible and an
//! infeasible incumbent exist, a poll-only iteration around the infeasible
//! one. The mega-iteration then updates the mesh once from the best success
//! observed, and the owning run performs the termination check.

use std::collections::HashSet;

use tracing::{debug, info};

use super::FrameContext;
use crate::algo::{EvalResultConsumer, TrialPointGenerator};
use crate::caching::CacheKey;
use crate::eval::{compute_success_type, Barrier, EvalPoint, SuccessType};
use crate::evaluator::{Batch, EvaluatorControl, LapBudget};
use crate::mesh::Mesh;
use crate::point::{Bounds, Direction, Point};
use crate::poll::Poll;
use crate::rng::RandomNumberGenerator;
use crate::search::Search;
use crate::stop::StopReason;

/// States of the iteration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterationState {
    Init,
    Search,
    Poll,
    Update,
    TerminationCheck,
}

/// Read-only view of a run shared by the steps of one iteration.
#[derive(Clone, Copy)]
pub struct IterationEnv<'a> {
    pub mesh: &'a Mesh,
    pub bounds: &'a Bounds,
    pub evc: &'a EvaluatorControl,
    pub last_direction: Option<&'a Direction>,
    pub iteration: usize,
    pub free_vars: Option<&'a [usize]>,
    pub lap: Option<&'a LapBudget>,
}

impl<'a> IterationEnv<'a> {
    /// The generator view of a frame around `center`.
    pub fn frame<'b>(&'b self, center: &'b EvalPoint, barrier: &'b Barrier) -> FrameContext<'b> {
        FrameContext {
            center,
            mesh: self.mesh,
            bounds: self.bounds,
            barrier,
            evc: self.evc,
            last_direction: self.last_direction,
            iteration: self.iteration,
            free_vars: self.free_vars,
        }
    }

    pub fn is_free(&self, i: usize) -> bool {
        self.free_vars.map_or(true, |vars| vars.contains(&i))
    }
}

/// What evaluating one or more batches brought.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub success: SuccessType,
    /// The point behind `success`.
    pub best: Option<EvalPoint>,
    /// A terminating batch-level reason, such as an exhausted lap budget.
    pub stop: Option<StopReason>,
    pub evaluated: usize,
}

impl StepOutcome {
    /// Folds a later step in. A later full success was measured against an
    /// already improved barrier, so it replaces an earlier one.
    pub fn merge(&mut self, other: StepOutcome) {
        if other.success > self.success
            || (other.success == SuccessType::FullSuccess && self.success == SuccessType::FullSuccess)
        {
            self.success = other.success;
            self.best = other.best;
        }
        if self.stop.is_none() {
            self.stop = other.stop;
        }
        self.evaluated += other.evaluated;
    }
}

/// Snaps generated points onto the frame: fixed variables take the center's
/// values, points are brought into the bounds, projected on the mesh and
/// snapped again, and incomplete points, duplicates and the center are
/// dropped.
pub fn prepare_points(points: Vec<EvalPoint>, center: &Point, env: &IterationEnv<'_>) -> Vec<EvalPoint> {
    let n = center.dim();
    let mut seen = HashSet::new();
    seen.insert(center.cache_key());
    points
        .into_iter()
        .filter_map(|mut p| {
            if p.point().dim() != n {
                debug!(expected = n, actual = p.point().dim(), "dropping point of wrong dimension");
                return None;
            }
            let coords: Vec<f64> = (0..n)
                .map(|i| if env.is_free(i) { p.point()[i] } else { center[i] })
                .collect();
            let x = env.bounds.snap(&Point::new(coords));
            let x = env.bounds.snap(&env.mesh.project_on_mesh(&x, center));
            if !x.is_complete() || !seen.insert(x.cache_key()) {
                return None;
            }
            p.set_point(x);
            Some(match p.point_from() {
                Some(_) => p,
                None => p.with_point_from(center),
            })
        })
        .collect()
}

/// Evaluates `points` against `barrier` and stores the results in it.
pub fn evaluate_step(
    env: &IterationEnv<'_>,
    points: Vec<EvalPoint>,
    barrier: &mut Barrier,
    opportunistic: bool,
    rng: &mut RandomNumberGenerator,
) -> StepOutcome {
    if points.is_empty() {
        return StepOutcome::default();
    }
    let result = env.evc.run(
        Batch::new(points)
            .barrier(barrier)
            .opportunistic(opportunistic)
            .last_direction(env.last_direction)
            .lap(env.lap),
        rng,
    );

    let mut outcome = StepOutcome {
        stop: result.stop.terminates().then_some(result.stop),
        evaluated: result.new_evaluations,
        ..StepOutcome::default()
    };
    for p in &result.points {
        let success = compute_success_type(p, barrier);
        let better_f = success == SuccessType::FullSuccess
            && outcome.success == SuccessType::FullSuccess
            && outcome
                .best
                .as_ref()
                .and_then(EvalPoint::f)
                .zip(p.f())
                .map_or(false, |(old, new)| new < old);
        if success > outcome.success || better_f {
            outcome.success = success;
            outcome.best = Some(p.clone());
        }
    }
    barrier.consume(&result.points);
    outcome
}

/// One iteration around one frame center.
#[derive(Debug, Clone)]
pub struct Iteration {
    center: EvalPoint,
    poll_only: bool,
    state: IterationState,
    outcome: StepOutcome,
}

impl Iteration {
    pub fn new(center: EvalPoint, poll_only: bool) -> Self {
        Self {
            center,
            poll_only,
            state: IterationState::Init,
            outcome: StepOutcome::default(),
        }
    }

    pub fn center(&self) -> &EvalPoint {
        &self.center
    }

    pub fn state(&self) -> IterationState {
        self.state
    }

    pub fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }

    /// Runs the search, then the poll unless the search already succeeded
    /// opportunistically.
    pub fn run(
        &mut self,
        env: &IterationEnv<'_>,
        search: &mut Search,
        poll: &mut Poll,
        barrier: &mut Barrier,
        rng: &mut RandomNumberGenerator,
    ) -> &StepOutcome {
        let opportunistic = env.evc.options().is_opportunistic();

        if !self.poll_only && !search.is_empty() {
            self.state = IterationState::Search;
            search.reset();
            let found = search.run(env, &self.center, barrier, rng);
            self.outcome.merge(found);
        }

        let skip_poll = self.outcome.stop.is_some()
            || env.evc.dispatch_blocked()
            || (search.is_opportunistic() && self.outcome.success == SuccessType::FullSuccess);
        if !skip_poll {
            self.state = IterationState::Poll;
            poll.reset();
            let points = {
                let ctx = env.frame(&self.center, barrier);
                poll.generate(&ctx, rng)
            };
            let points = prepare_points(points, self.center.point(), env);
            let polled = evaluate_step(env, points, barrier, opportunistic, rng);
            self.outcome.merge(polled);
        }

        self.state = IterationState::Update;
        &self.outcome
    }
}

/// The primary iteration and, possibly, a secondary poll.
#[derive(Debug, Clone)]
pub struct MegaIteration {
    k: usize,
    state: IterationState,
    outcome: StepOutcome,
    reference_h: Option<f64>,
}

impl MegaIteration {
    /// # Arguments
    ///
    /// * `k` - Mega-iteration counter, starting at 1.
    /// * `barrier` - The barrier before the mega-iteration.
    pub fn new(k: usize, barrier: &Barrier) -> Self {
        Self {
            k,
            state: IterationState::Init,
            outcome: StepOutcome::default(),
            reference_h: barrier.best_infeasible().and_then(EvalPoint::h),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn state(&self) -> IterationState {
        self.state
    }

    pub fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }

    /// Runs the iterations.
    ///
    /// # Arguments
    ///
    /// * `fallback` - Frame center used while the barrier is empty.
    /// * `secondary_poll` - Whether a poll around the infeasible incumbent
    ///   may follow the primary iteration.
    #[allow(clippy::too_many_arguments)]
    pub fn search_and_poll(
        &mut self,
        env: &IterationEnv<'_>,
        search: &mut Search,
        poll: &mut Poll,
        barrier: &mut Barrier,
        fallback: &EvalPoint,
        secondary_poll: bool,
        rng: &mut RandomNumberGenerator,
    ) -> &StepOutcome {
        let primary = barrier.primary_center().unwrap_or(fallback).clone();
        let secondary = barrier.secondary_center().cloned();

        self.state = IterationState::Search;
        let mut first = Iteration::new(primary, false);
        first.run(env, search, poll, barrier, rng);
        self.outcome.merge(first.outcome);

        if let Some(center) = secondary.filter(|_| secondary_poll) {
            let blocked = self.outcome.stop.is_some() || env.evc.dispatch_blocked();
            if !blocked && self.outcome.success < SuccessType::FullSuccess {
                self.state = IterationState::Poll;
                let mut second = Iteration::new(center, true);
                second.run(env, search, poll, barrier, rng);
                self.outcome.merge(second.outcome);
            }
        }
        self.state = IterationState::Update;
        &self.outcome
    }

    /// Folds in an outcome obtained outside [`search_and_poll`], such as the
    /// incumbents of subproblem runs.
    ///
    /// [`search_and_poll`]: MegaIteration::search_and_poll
    pub fn record(&mut self, outcome: StepOutcome) {
        self.outcome.merge(outcome);
    }

    /// Updates the mesh from the best success and returns the direction of
    /// the successful point, if any.
    ///
    /// A full success enlarges the frame, a partial success keeps it and
    /// tightens `h_max`, anything else refines it.
    pub fn update(&mut self, mesh: &mut Mesh, barrier: &mut Barrier) -> Option<Direction> {
        self.state = IterationState::Update;
        let direction = self.outcome.best.as_ref().and_then(EvalPoint::direction);
        match self.outcome.success {
            SuccessType::FullSuccess => {
                let enlarged = mesh.enlarge(direction.as_ref());
                info!(k = self.k, enlarged, "full success");
            }
            SuccessType::PartialSuccess => {
                if let Some(h) = self.reference_h {
                    barrier.tighten_h_max(h);
                }
                info!(k = self.k, h_max = barrier.h_max(), "partial success");
            }
            SuccessType::NoSuccess | SuccessType::NotEvaluated => {
                mesh.refine();
                debug!(k = self.k, "no success, mesh refined");
            }
        }
        self.state = IterationState::TerminationCheck;
        if self.outcome.success >= SuccessType::PartialSuccess {
            direction
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{BbOutput, Constraints};
    use crate::evaluator::{EvaluationError, Evaluator, FnEvaluator};
    use crate::options::EvaluatorOptions;
    use crate::poll::PollStrategy;
    use crate::search::SearchTieBreak;
    use std::sync::Arc;

    fn sphere_control() -> EvaluatorControl {
        let eval: Arc<dyn Evaluator> = Arc::new(FnEvaluator::new(|x: &Point| {
            Ok::<_, EvaluationError>(BbOutput::unconstrained(
                x.coords().iter().map(|c| c * c).sum(),
            ))
        }));
        EvaluatorControl::new(eval, Constraints::default(), EvaluatorOptions::default()).unwrap()
    }

    fn evaluated_center(evc: &EvaluatorControl, x: Vec<f64>, barrier: &mut Barrier) -> EvalPoint {
        let mut rng = RandomNumberGenerator::from_seed(0);
        let res = evc.run(
            Batch::new(vec![EvalPoint::new(Point::new(x), crate::eval::StepType::X0)]),
            &mut rng,
        );
        barrier.insert_all(&res.points);
        res.points[0].clone()
    }

    #[test]
    fn test_prepare_points_fixes_and_dedups() {
        let evc = sphere_control();
        let mesh = Mesh::new(&[1.0, 1.0, 1.0], &[0.0; 3]).unwrap();
        let bounds = Bounds::new(vec![-2.0; 3], vec![2.0; 3]).unwrap();
        let free = [0usize, 1];
        let env = IterationEnv {
            mesh: &mesh,
            bounds: &bounds,
            evc: &evc,
            last_direction: None,
            iteration: 1,
            free_vars: Some(&free),
            lap: None,
        };
        let center = Point::new(vec![0.0, 0.0, 0.0]);
        let raw = vec![
            EvalPoint::new(Point::new(vec![0.4, 1.2, 5.0]), crate::eval::StepType::UserSearch),
            EvalPoint::new(Point::new(vec![0.1, 0.9, -3.0]), crate::eval::StepType::UserSearch),
            EvalPoint::new(Point::new(vec![0.2, 0.1, 0.0]), crate::eval::StepType::UserSearch),
            EvalPoint::new(Point::new(vec![9.0, 0.0, 0.0]), crate::eval::StepType::UserSearch),
        ];
        let prepared = prepare_points(raw, &center, &env);
        let coords: Vec<Vec<f64>> = prepared.iter().map(|p| p.point().coords().to_vec()).collect();
        assert_eq!(coords, vec![vec![0.0, 1.0, 0.0], vec![2.0, 0.0, 0.0]]);
        assert!(prepared.iter().all(|p| p.point_from() == Some(&center)));
    }

    #[test]
    fn test_prepare_points_projects_after_bounds() {
        let evc = sphere_control();
        let mesh = Mesh::new(&[1.0, 1.0], &[0.0; 2]).unwrap();
        let bounds = Bounds::new(vec![-2.4; 2], vec![2.4; 2]).unwrap();
        let env = IterationEnv {
            mesh: &mesh,
            bounds: &bounds,
            evc: &evc,
            last_direction: None,
            iteration: 1,
            free_vars: None,
            lap: None,
        };
        let center = Point::new(vec![0.0, 0.0]);
        let raw = vec![EvalPoint::new(Point::new(vec![7.3, -0.2]), crate::eval::StepType::UserSearch)];

        let prepared = prepare_points(raw, &center, &env);
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].point().coords(), &[2.0, 0.0][..]);
        assert!(mesh.is_on_mesh(prepared[0].point(), &center));
    }

    #[test]
    fn test_mega_iteration_enlarges_on_success() {
        let evc = sphere_control();
        let mut barrier = Barrier::new(0.0, 10);
        let center = evaluated_center(&evc, vec![3.0, 3.0], &mut barrier);
        let mut mesh = Mesh::new(&[1.0, 1.0], &[0.0, 0.0]).unwrap();
        let bounds = Bounds::unbounded(2);
        let mut search = Search::new(true, SearchTieBreak::PriorityOrder);
        let mut poll = Poll::new(PollStrategy::Ortho2N);
        let mut rng = RandomNumberGenerator::from_seed(1);

        let mut mega = MegaIteration::new(1, &barrier);
        {
            let env = IterationEnv {
                mesh: &mesh,
                bounds: &bounds,
                evc: &evc,
                last_direction: None,
                iteration: 1,
                free_vars: None,
                lap: None,
            };
            let outcome = mega.search_and_poll(&env, &mut search, &mut poll, &mut barrier, &center, true, &mut rng);
            assert_eq!(outcome.success, SuccessType::FullSuccess);
        }
        let direction = mega.update(&mut mesh, &mut barrier).unwrap();
        assert_eq!(direction.norm_inf(), 1.0);
        assert!(mesh.delta_frame(0) > 1.0 || mesh.delta_frame(1) > 1.0);
        assert_eq!(mega.state(), IterationState::TerminationCheck);
        assert!(barrier.best_feasible().unwrap().f().unwrap() < 18.0);
    }

    #[test]
    fn test_mega_iteration_refines_without_success() {
        let evc = sphere_control();
        let mut barrier = Barrier::new(0.0, 10);
        let center = evaluated_center(&evc, vec![0.0, 0.0], &mut barrier);
        let mut mesh = Mesh::new(&[1.0, 1.0], &[0.0, 0.0]).unwrap();
        let bounds = Bounds::unbounded(2);
        let mut search = Search::new(true, SearchTieBreak::PriorityOrder);
        let mut poll = Poll::new(PollStrategy::Ortho2N);
        let mut rng = RandomNumberGenerator::from_seed(1);

        let mut mega = MegaIteration::new(1, &barrier);
        {
            let env = IterationEnv {
                mesh: &mesh,
                bounds: &bounds,
                evc: &evc,
                last_direction: None,
                iteration: 1,
                free_vars: None,
                lap: None,
            };
            let outcome = mega.search_and_poll(&env, &mut search, &mut poll, &mut barrier, &center, true, &mut rng);
            assert_eq!(outcome.success, SuccessType::NoSuccess);
            assert_eq!(outcome.evaluated, 4);
        }
        assert!(mega.update(&mut mesh, &mut barrier).is_none());
        assert!((mesh.delta_frame(0) - 0.5).abs() < 1e-12);
    }
}
