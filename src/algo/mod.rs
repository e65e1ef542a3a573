//! # Algorithms
//!
//! The step hierarchy is expressed through three capabilities:
//!
//! - [`Runnable`]: something that initializes, runs to termination and
//!   reports a [`RunResult`];
//! - [`TrialPointGenerator`]: something that proposes points around a frame
//!   (the poll and every search method);
//! - [`EvalResultConsumer`]: something that learns from evaluated points;
//!   every evaluated batch reaches the run's barrier through it.
//!
//! [`Algorithm`] dispatches over the shipped algorithm families, selected by
//! an [`AlgorithmKind`].

pub mod context;
pub mod decomposition;
pub mod iteration;
pub mod mads;

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::eval::{Barrier, EvalPoint, SuccessType};
use crate::evaluator::{Evaluator, EvaluatorControl};
use crate::mesh::Mesh;
use crate::options::{MadsOptions, Problem};
use crate::point::{Bounds, Direction};
use crate::rng::RandomNumberGenerator;
use crate::stop::{StopReason, StopReasons};

pub use context::RunContext;
pub use decomposition::{PsdMads, SsdMads};
pub use iteration::{IterationState, MegaIteration};
pub use mads::Mads;

/// Everything a generator may look at when proposing points around a frame.
#[derive(Clone, Copy)]
pub struct FrameContext<'a> {
    /// The frame center.
    pub center: &'a EvalPoint,
    pub mesh: &'a Mesh,
    pub bounds: &'a Bounds,
    pub barrier: &'a Barrier,
    pub evc: &'a EvaluatorControl,
    pub last_direction: Option<&'a Direction>,
    /// Iteration counter of the owning run, starting at 1.
    pub iteration: usize,
    /// Variables the run may move; `None` means all of them.
    pub free_vars: Option<&'a [usize]>,
}

impl fmt::Debug for FrameContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameContext")
            .field("center", self.center.point())
            .field("iteration", &self.iteration)
            .field("free_vars", &self.free_vars)
            .finish()
    }
}

impl FrameContext<'_> {
    pub fn dimension(&self) -> usize {
        self.center.point().dim()
    }

    /// Whether variable `i` may move.
    pub fn is_free(&self, i: usize) -> bool {
        self.free_vars.map_or(true, |vars| vars.contains(&i))
    }
}

/// Proposes trial points around a frame.
pub trait TrialPointGenerator: Send {
    fn name(&self) -> &'static str;

    /// Proposes points; an empty result is recorded in the generator's own
    /// stop reason.
    fn generate(
        &mut self,
        ctx: &FrameContext<'_>,
        rng: &mut RandomNumberGenerator,
    ) -> Vec<EvalPoint>;

    fn stop_reason(&self) -> StopReason;

    /// Brings the stop reason back to `STARTED` before the next iteration.
    fn reset(&mut self);
}

/// Learns from evaluated points.
pub trait EvalResultConsumer {
    /// Returns the best success the points brought.
    fn consume(&mut self, points: &[EvalPoint]) -> SuccessType;
}

impl EvalResultConsumer for Barrier {
    fn consume(&mut self, points: &[EvalPoint]) -> SuccessType {
        self.insert_all(points)
    }
}

/// Something that runs to termination.
pub trait Runnable {
    /// Prepares the run; fatal problems are errors.
    fn init(&mut self) -> Result<()>;

    /// Runs to termination.
    fn run(&mut self) -> Result<RunResult>;

    /// Whether any stop condition holds.
    fn termination_check(&mut self) -> bool;
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub best_feasible: Option<EvalPoint>,
    pub best_infeasible: Option<EvalPoint>,
    pub stop_reasons: StopReasons,
    /// The reported reason: an error if any, else the deepest terminating
    /// cause.
    pub final_reason: StopReason,
    pub iterations: usize,
    pub bb_evals: usize,
    pub evals: usize,
    pub mesh: Option<Mesh>,
}

impl RunResult {
    pub fn is_error(&self) -> bool {
        self.final_reason.is_error()
    }

    /// The best point found, feasible first.
    pub fn best(&self) -> Option<&EvalPoint> {
        self.best_feasible.as_ref().or(self.best_infeasible.as_ref())
    }
}

/// The algorithm families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AlgorithmKind {
    #[default]
    Mads,
    /// Sequential space decomposition.
    SsdMads,
    /// Parallel space decomposition.
    PsdMads,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 3] = [Self::Mads, Self::SsdMads, Self::PsdMads];

    pub fn name(self) -> &'static str {
        match self {
            Self::Mads => "MADS",
            Self::SsdMads => "SSD-MADS",
            Self::PsdMads => "PSD-MADS",
        }
    }

    /// Builds the algorithm with its own evaluator control.
    pub fn build(
        self,
        problem: Problem,
        options: MadsOptions,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Algorithm> {
        let evc = Arc::new(EvaluatorControl::new(
            evaluator,
            problem.constraints(),
            options.get_evaluator().clone(),
        )?);
        self.build_with(problem, options, evc)
    }

    /// Builds the algorithm on a shared evaluator control.
    pub fn build_with(
        self,
        problem: Problem,
        options: MadsOptions,
        evc: Arc<EvaluatorControl>,
    ) -> Result<Algorithm> {
        Ok(match self {
            Self::Mads => Algorithm::Mads(Box::new(Mads::with_control(problem, options, evc)?)),
            Self::SsdMads => Algorithm::SsdMads(SsdMads::new(problem, options, evc)?),
            Self::PsdMads => Algorithm::PsdMads(PsdMads::new(problem, options, evc)?),
        })
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A runnable algorithm of any family.
#[derive(Debug)]
pub enum Algorithm {
    Mads(Box<Mads>),
    SsdMads(SsdMads),
    PsdMads(PsdMads),
}

impl Algorithm {
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Self::Mads(_) => AlgorithmKind::Mads,
            Self::SsdMads(_) => AlgorithmKind::SsdMads,
            Self::PsdMads(_) => AlgorithmKind::PsdMads,
        }
    }

    fn as_runnable(&mut self) -> &mut dyn Runnable {
        match self {
            Self::Mads(m) => m.as_mut(),
            Self::SsdMads(s) => s,
            Self::PsdMads(p) => p,
        }
    }
}

impl Runnable for Algorithm {
    fn init(&mut self) -> Result<()> {
        self.as_runnable().init()
    }

    fn run(&mut self) -> Result<RunResult> {
        self.as_runnable().run()
    }

    fn termination_check(&mut self) -> bool {
        self.as_runnable().termination_check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{EvaluationError, FnEvaluator};
    use crate::eval::{BbOutput, Constraints, StepType};
    use crate::point::Point;

    fn evaluated(x: f64, f: f64) -> EvalPoint {
        let mut p = EvalPoint::new(Point::new(vec![x]), StepType::Poll);
        p.record(Ok(BbOutput::unconstrained(f)), &Constraints::default());
        p
    }

    #[test]
    fn test_barrier_consumes_evaluated_batch() {
        let mut barrier = Barrier::new(0.0, 5);
        assert_eq!(barrier.consume(&[evaluated(0.0, 4.0)]), SuccessType::FullSuccess);
        assert_eq!(barrier.consume(&[evaluated(1.0, 5.0)]), SuccessType::NoSuccess);
        assert_eq!(
            barrier.consume(&[evaluated(2.0, 6.0), evaluated(3.0, 1.0)]),
            SuccessType::FullSuccess
        );
        assert_eq!(barrier.best_feasible().and_then(EvalPoint::f), Some(1.0));
    }

    #[test]
    fn test_registry_builds_every_kind() {
        for kind in AlgorithmKind::ALL {
            let problem = Problem::builder()
                .x0(Point::new(vec![1.0, 1.0, 1.0]))
                .bounds(vec![-2.0; 3], vec![2.0; 3])
                .build()
                .unwrap();
            let options = MadsOptions::builder().max_iterations(2).build().unwrap();
            let eval: Arc<dyn Evaluator> = Arc::new(FnEvaluator::new(|x: &Point| {
                Ok::<_, EvaluationError>(BbOutput::unconstrained(
                    x.coords().iter().map(|c| c * c).sum(),
                ))
            }));
            let mut algo = kind.build(problem, options, eval).unwrap();
            assert_eq!(algo.kind(), kind);
            let result = algo.run().unwrap();
            assert!(result.best_feasible.is_some(), "{}", kind);
            assert!(!result.is_error());
        }
    }
}
