//! # Evaluators
//!
//! The blackbox is reached through the [`Evaluator`] trait. Implementations
//! must be callable concurrently from the worker threads. A call either
//! returns the raw [`BbOutput`] or an [`EvaluationError`]; `Failed` marks the
//! point `EvalFailed`, `Crashed` marks it `EvalError`. A panic inside the
//! evaluator is caught and treated as a crash.
//!
//! ## Example
//!
//! ```rust
//! use mads::eval::{BbOutput, EvalType};
//! use mads::evaluator::{EvaluationError, Evaluator, FnEvaluator};
//! use mads::point::Point;
//!
//! let sphere = FnEvaluator::new(|x: &Point| {
//!     Ok::<_, EvaluationError>(BbOutput::unconstrained(x.coords().iter().map(|c| c * c).sum()))
//! });
//! let out = sphere.evaluate(&Point::new(vec![1.0, 2.0]), EvalType::Blackbox).unwrap();
//! assert_eq!(out.objective(), 5.0);
//! ```

pub mod control;
pub mod queue;

use std::sync::Arc;

use thiserror::Error;

use crate::eval::{BbOutput, EvalType};
use crate::point::Point;

pub use control::{Batch, BatchResult, EvaluatorControl, LapBudget};
pub use queue::{EvalQueuePoint, EvalSortType, Priority};

/// Why a single evaluation produced no usable output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// The blackbox ran but reported a failure.
    #[error("evaluation failed: {0}")]
    Failed(String),

    /// The blackbox crashed or could not be run.
    #[error("evaluation crashed: {0}")]
    Crashed(String),
}

/// Something that evaluates points.
pub trait Evaluator: Send + Sync {
    /// Evaluates one point.
    ///
    /// # Arguments
    ///
    /// * `x` - The point, every coordinate defined.
    /// * `eval_type` - Which fidelity is requested.
    fn evaluate(&self, x: &Point, eval_type: EvalType) -> Result<BbOutput, EvaluationError>;

    /// Evaluates a block of points in one call. Must return one outcome per
    /// point, in order.
    fn evaluate_block(
        &self,
        xs: &[Point],
        eval_type: EvalType,
    ) -> Vec<Result<BbOutput, EvaluationError>> {
        xs.iter().map(|x| self.evaluate(x, eval_type)).collect()
    }
}

impl<E> Evaluator for Arc<E>
where
    E: Evaluator + ?Sized,
{
    fn evaluate(&self, x: &Point, eval_type: EvalType) -> Result<BbOutput, EvaluationError> {
        (**self).evaluate(x, eval_type)
    }

    fn evaluate_block(
        &self,
        xs: &[Point],
        eval_type: EvalType,
    ) -> Vec<Result<BbOutput, EvaluationError>> {
        (**self).evaluate_block(xs, eval_type)
    }
}

/// Adapts a closure into an [`Evaluator`]; the evaluation type is ignored.
#[derive(Clone)]
pub struct FnEvaluator<F> {
    func: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&Point) -> Result<BbOutput, EvaluationError> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Evaluator for FnEvaluator<F>
where
    F: Fn(&Point) -> Result<BbOutput, EvaluationError> + Send + Sync,
{
    fn evaluate(&self, x: &Point, _eval_type: EvalType) -> Result<BbOutput, EvaluationError> {
        (self.func)(x)
    }
}
