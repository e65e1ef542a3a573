//! # Search
//!
//! The search step runs its methods in a fixed order before the poll. Every
//! method is a [`TrialPointGenerator`] with its own stop reason, so a method
//! that cannot propose anything never stops its siblings or the run.
//!
//! Generated points need not lie on the mesh: the search projects them on
//! the mesh anchored at the frame center and snaps them into the bounds
//! before evaluation.
//!
//! When several methods succeed under opportunism, [`SearchTieBreak`] decides
//! which success counts: the first method in order, or the best objective
//! among all methods evaluated together in one batch.

pub mod lhs;
pub mod model;
pub mod nm;
pub mod speculative;
pub mod user;

use std::fmt;

use tracing::debug;

use crate::algo::iteration::{evaluate_step, prepare_points, IterationEnv, StepOutcome};
use crate::algo::TrialPointGenerator;
use crate::eval::{Barrier, EvalPoint, SuccessType};
use crate::options::SearchOptions;
use crate::rng::RandomNumberGenerator;
use crate::stop::StopReason;

pub use lhs::LatinHypercubeSearch;
pub use model::{InverseDistanceModel, ModelSearch, SurrogateModel};
pub use nm::NelderMeadSearch;
pub use speculative::SpeculativeSearch;
pub use user::UserSearch;

/// Which success wins when several search methods succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SearchTieBreak {
    /// Methods run one after the other; the first success ends the search.
    #[default]
    PriorityOrder,
    /// All methods propose first and are evaluated as one batch; the best
    /// objective among the successes becomes the incumbent.
    BestObjective,
}

/// The ordered search methods of a run.
pub struct Search {
    methods: Vec<Box<dyn TrialPointGenerator>>,
    opportunistic: bool,
    tie_break: SearchTieBreak,
}

impl fmt::Debug for Search {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Search")
            .field("methods", &self.method_names())
            .field("opportunistic", &self.opportunistic)
            .field("tie_break", &self.tie_break)
            .finish()
    }
}

impl Search {
    pub fn new(opportunistic: bool, tie_break: SearchTieBreak) -> Self {
        Self {
            methods: Vec::new(),
            opportunistic,
            tie_break,
        }
    }

    /// The methods enabled in `options`, in the order speculative, Latin
    /// hypercube, Nelder-Mead.
    pub fn from_options(options: &SearchOptions) -> Self {
        let mut search = Self::new(options.opportunistic, options.tie_break);
        if options.speculative {
            search.push(Box::new(SpeculativeSearch::new(options.speculative_max_points)));
        }
        if let Some((initial, per_iteration)) = options.latin_hypercube {
            search.push(Box::new(LatinHypercubeSearch::new(initial, per_iteration)));
        }
        if let Some(nm) = options.nelder_mead {
            search.push(Box::new(NelderMeadSearch::new(nm)));
        }
        search
    }

    /// Appends a method; it runs after the ones already present.
    pub fn push(&mut self, method: Box<dyn TrialPointGenerator>) {
        self.methods.push(method);
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn is_opportunistic(&self) -> bool {
        self.opportunistic
    }

    pub fn tie_break(&self) -> SearchTieBreak {
        self.tie_break
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        self.methods.iter().map(|m| m.name()).collect()
    }

    /// The stop reason of every method, in order.
    pub fn method_stop_reasons(&self) -> Vec<(&'static str, StopReason)> {
        self.methods
            .iter()
            .map(|m| (m.name(), m.stop_reason()))
            .collect()
    }

    /// Resets every method's stop reason.
    pub fn reset(&mut self) {
        self.methods.iter_mut().for_each(|m| m.reset());
    }

    /// Runs the methods around `center` and stores the results in `barrier`.
    pub fn run(
        &mut self,
        env: &IterationEnv<'_>,
        center: &EvalPoint,
        barrier: &mut Barrier,
        rng: &mut RandomNumberGenerator,
    ) -> StepOutcome {
        match self.tie_break {
            SearchTieBreak::PriorityOrder => self.run_in_order(env, center, barrier, rng),
            SearchTieBreak::BestObjective => self.run_together(env, center, barrier, rng),
        }
    }

    fn run_in_order(
        &mut self,
        env: &IterationEnv<'_>,
        center: &EvalPoint,
        barrier: &mut Barrier,
        rng: &mut RandomNumberGenerator,
    ) -> StepOutcome {
        let opportunistic = env.evc.options().is_opportunistic();
        let mut outcome = StepOutcome::default();
        for method in &mut self.methods {
            if env.evc.dispatch_blocked() {
                break;
            }
            let points = {
                let ctx = env.frame(center, barrier);
                method.generate(&ctx, rng)
            };
            let points = prepare_points(points, center.point(), env);
            debug!(method = method.name(), count = points.len(), "search points");
            outcome.merge(evaluate_step(env, points, barrier, opportunistic, rng));

            if outcome.stop.is_some()
                || (self.opportunistic && outcome.success == SuccessType::FullSuccess)
            {
                break;
            }
        }
        outcome
    }

    fn run_together(
        &mut self,
        env: &IterationEnv<'_>,
        center: &EvalPoint,
        barrier: &mut Barrier,
        rng: &mut RandomNumberGenerator,
    ) -> StepOutcome {
        let mut all = Vec::new();
        {
            let ctx = env.frame(center, barrier);
            for method in &mut self.methods {
                let points = method.generate(&ctx, rng);
                debug!(method = method.name(), count = points.len(), "search points");
                all.extend(points);
            }
        }
        let points = prepare_points(all, center.point(), env);
        evaluate_step(env, points, barrier, false, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::FrameContext;
    use crate::eval::{BbOutput, Constraints, StepType};
    use crate::evaluator::{Batch, EvaluationError, Evaluator, EvaluatorControl, FnEvaluator};
    use crate::mesh::Mesh;
    use crate::options::EvaluatorOptions;
    use crate::point::{Bounds, Point};
    use crate::stop::{SearchStop, Phase};
    use std::sync::Arc;

    struct Fixed {
        name: &'static str,
        points: Vec<Vec<f64>>,
        stop: StopReason,
    }

    impl TrialPointGenerator for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn generate(&mut self, _: &FrameContext<'_>, _: &mut RandomNumberGenerator) -> Vec<EvalPoint> {
            self.stop.set(SearchStop::PassCompleted);
            self.points
                .iter()
                .map(|x| EvalPoint::new(Point::new(x.clone()), StepType::UserSearch))
                .collect()
        }

        fn stop_reason(&self) -> StopReason {
            self.stop
        }

        fn reset(&mut self) {
            self.stop.reset();
        }
    }

    fn fixed(name: &'static str, points: Vec<Vec<f64>>) -> Box<dyn TrialPointGenerator> {
        Box::new(Fixed {
            name,
            points,
            stop: StopReason::started(Phase::Search),
        })
    }

    fn run_search(tie_break: SearchTieBreak) -> (Barrier, StepOutcome, Search) {
        let eval: Arc<dyn Evaluator> = Arc::new(FnEvaluator::new(|x: &Point| {
            Ok::<_, EvaluationError>(BbOutput::unconstrained(x[0]))
        }));
        let evc = EvaluatorControl::new(eval, Constraints::default(), EvaluatorOptions::default()).unwrap();
        let mesh = Mesh::new(&[1.0], &[0.0]).unwrap();
        let bounds = Bounds::unbounded(1);
        let mut rng = RandomNumberGenerator::from_seed(0);
        let mut barrier = Barrier::new(0.0, 10);
        let x0 = evc.run(
            Batch::new(vec![EvalPoint::new(Point::new(vec![10.0]), StepType::X0)]),
            &mut rng,
        );
        barrier.insert_all(&x0.points);
        let center = x0.points[0].clone();

        let mut search = Search::new(true, tie_break);
        search.push(fixed("first", vec![vec![8.0]]));
        search.push(fixed("second", vec![vec![2.0]]));
        let env = IterationEnv {
            mesh: &mesh,
            bounds: &bounds,
            evc: &evc,
            last_direction: None,
            iteration: 1,
            free_vars: None,
            lap: None,
        };
        let outcome = search.run(&env, &center, &mut barrier, &mut rng);
        (barrier, outcome, search)
    }

    #[test]
    fn test_priority_order_stops_at_first_success() {
        let (barrier, outcome, search) = run_search(SearchTieBreak::PriorityOrder);
        assert_eq!(outcome.success, SuccessType::FullSuccess);
        assert_eq!(barrier.best_feasible().unwrap().f(), Some(8.0));
        let reasons = search.method_stop_reasons();
        assert!(reasons[0].1.is(SearchStop::PassCompleted));
        assert!(reasons[1].1.is_started());
    }

    #[test]
    fn test_best_objective_evaluates_all() {
        let (barrier, outcome, _) = run_search(SearchTieBreak::BestObjective);
        assert_eq!(outcome.success, SuccessType::FullSuccess);
        assert_eq!(outcome.evaluated, 2);
        assert_eq!(barrier.best_feasible().unwrap().f(), Some(2.0));
        assert_eq!(outcome.best.unwrap().f(), Some(2.0));
    }

    #[test]
    fn test_from_options() {
        let options = SearchOptions {
            latin_hypercube: Some((10, 2)),
            nelder_mead: Some(Default::default()),
            ..SearchOptions::default()
        };
        let search = Search::from_options(&options);
        assert_eq!(
            search.method_names(),
            vec!["SpeculativeSearch", "LatinHypercubeSearch", "NelderMeadSearch"]
        );
    }
}
