//! # Evaluated points
//!
//! An [`EvalPoint`] is a [`Point`] plus everything learned by evaluating it:
//! the raw blackbox output, the objective `f`, the aggregated constraint
//! violation `h` and an [`EvalStatus`]. The status only moves forward:
//! `NotEvaluated -> InProgress -> EvalOk | EvalFailed | EvalError`.

pub mod barrier;
pub mod success;

use crate::evaluator::EvaluationError;
use crate::point::{Direction, Point};

pub use barrier::Barrier;
pub use success::{compute_success_type, SuccessType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EvalStatus {
    NotEvaluated,
    InProgress,
    EvalOk,
    /// The blackbox reported a failure, for example a simulation that did not converge.
    EvalFailed,
    /// The blackbox crashed or returned unusable data.
    EvalError,
}

impl EvalStatus {
    pub fn is_done(self) -> bool {
        matches!(
            self,
            EvalStatus::EvalOk | EvalStatus::EvalFailed | EvalStatus::EvalError
        )
    }
}

/// What produced an evaluation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EvalType {
    /// The true blackbox.
    Blackbox,
    /// A cheap static surrogate supplied by the user, used for ordering.
    Surrogate,
    /// A model fitted during the run. Never cached.
    Model,
}

/// The generator a trial point comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StepType {
    X0,
    Poll,
    SecondaryPoll,
    SpeculativeSearch,
    LhSearch,
    NmSearch,
    ModelSearch,
    UserSearch,
    Imported,
}

/// Raw output of one evaluation: the objective and the constraint values,
/// where a constraint is satisfied when its value is `<= 0`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BbOutput {
    objective: f64,
    constraints: Vec<f64>,
}

impl BbOutput {
    pub fn new(objective: f64, constraints: Vec<f64>) -> Self {
        Self {
            objective,
            constraints,
        }
    }

    pub fn unconstrained(objective: f64) -> Self {
        Self::new(objective, Vec::new())
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn constraints(&self) -> &[f64] {
        &self.constraints
    }
}

/// How a constraint participates in `h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConstraintKind {
    /// Violations are aggregated into `h`, infeasible points are kept in the barrier.
    #[default]
    Progressive,
    /// Any violation rejects the point (`h = +inf`).
    Extreme,
}

/// Norm used to aggregate progressive violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HNorm {
    L1,
    /// Sum of squared violations.
    #[default]
    L2,
    Linf,
}

/// The constraint structure of a problem.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Constraints {
    kinds: Vec<ConstraintKind>,
    norm: HNorm,
}

impl Constraints {
    pub fn new(kinds: Vec<ConstraintKind>, norm: HNorm) -> Self {
        Self { kinds, norm }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn kinds(&self) -> &[ConstraintKind] {
        &self.kinds
    }

    /// Aggregated violation of `values`.
    ///
    /// # Returns
    ///
    /// `None` when the number of values does not match or a value is NaN.
    pub fn compute_h(&self, values: &[f64]) -> Option<f64> {
        if values.len() != self.kinds.len() || values.iter().any(|v| v.is_nan()) {
            return None;
        }
        let mut h: f64 = 0.0;
        for (&value, kind) in values.iter().zip(&self.kinds) {
            if value <= 0.0 {
                continue;
            }
            match kind {
                ConstraintKind::Extreme => return Some(f64::INFINITY),
                ConstraintKind::Progressive => match self.norm {
                    HNorm::L1 => h += value,
                    HNorm::L2 => h += value * value,
                    HNorm::Linf => h = h.max(value),
                },
            }
        }
        Some(h)
    }
}

/// A point and its evaluation record.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EvalPoint {
    point: Point,
    status: EvalStatus,
    eval_type: EvalType,
    output: Option<BbOutput>,
    f: Option<f64>,
    h: Option<f64>,
    step: StepType,
    tag: u64,
    point_from: Option<Point>,
    message: Option<String>,
}

impl EvalPoint {
    pub fn new(point: Point, step: StepType) -> Self {
        Self {
            point,
            status: EvalStatus::NotEvaluated,
            eval_type: EvalType::Blackbox,
            output: None,
            f: None,
            h: None,
            step,
            tag: 0,
            point_from: None,
            message: None,
        }
    }

    /// Records the frame center this point was generated from.
    pub fn with_point_from(mut self, from: &Point) -> Self {
        self.point_from = Some(from.clone());
        self
    }

    pub fn with_eval_type(mut self, eval_type: EvalType) -> Self {
        self.eval_type = eval_type;
        self
    }

    pub fn point(&self) -> &Point {
        &self.point
    }

    pub fn status(&self) -> EvalStatus {
        self.status
    }

    pub fn eval_type(&self) -> EvalType {
        self.eval_type
    }

    pub fn output(&self) -> Option<&BbOutput> {
        self.output.as_ref()
    }

    /// Objective value, defined only for a successful evaluation.
    pub fn f(&self) -> Option<f64> {
        self.f
    }

    /// Constraint violation, defined only for a successful evaluation.
    pub fn h(&self) -> Option<f64> {
        self.h
    }

    pub fn step(&self) -> StepType {
        self.step
    }

    /// Order of dispatch; `0` for points that were never dispatched.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn point_from(&self) -> Option<&Point> {
        self.point_from.as_ref()
    }

    /// The failure message of an unsuccessful evaluation.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.status == EvalStatus::EvalOk
    }

    pub fn is_feasible(&self, h_tolerance: f64) -> bool {
        self.is_ok() && self.h.map_or(false, |h| h <= h_tolerance)
    }

    /// Displacement from the generating frame center.
    pub fn direction(&self) -> Option<Direction> {
        self.point_from
            .as_ref()
            .and_then(|from| self.point.minus(from).ok())
    }

    pub(crate) fn set_tag(&mut self, tag: u64) {
        self.tag = tag;
    }

    pub(crate) fn set_step(&mut self, step: StepType) {
        self.step = step;
    }

    pub(crate) fn set_point(&mut self, point: Point) {
        if self.status == EvalStatus::NotEvaluated {
            self.point = point;
        }
    }

    /// `NotEvaluated -> InProgress`. Returns `false` on any other status.
    pub fn set_in_progress(&mut self) -> bool {
        if self.status != EvalStatus::NotEvaluated {
            return false;
        }
        self.status = EvalStatus::InProgress;
        true
    }

    /// Stores the outcome of an evaluation.
    ///
    /// A NaN objective, a NaN constraint or a wrong number of constraints is
    /// recorded as `EvalError`. Returns `false`, leaving the point untouched,
    /// if it already holds a result.
    pub fn record(
        &mut self,
        outcome: std::result::Result<BbOutput, EvaluationError>,
        constraints: &Constraints,
    ) -> bool {
        if self.status.is_done() {
            return false;
        }
        match outcome {
            Ok(output) => {
                let h = constraints.compute_h(output.constraints());
                match h {
                    Some(h) if !output.objective().is_nan() => {
                        self.f = Some(output.objective());
                        self.h = Some(h);
                        self.status = EvalStatus::EvalOk;
                    }
                    _ => {
                        self.status = EvalStatus::EvalError;
                        self.message = Some(format!(
                            "invalid blackbox output: objective {}, {} constraint(s) for {} expected",
                            output.objective(),
                            output.constraints().len(),
                            constraints.len()
                        ));
                    }
                }
                self.output = Some(output);
            }
            Err(err) => {
                self.status = match err {
                    EvaluationError::Failed(_) => EvalStatus::EvalFailed,
                    EvaluationError::Crashed(_) => EvalStatus::EvalError,
                };
                self.message = Some(err.to_string());
            }
        }
        true
    }

    /// Copies the evaluation record of `done`, an earlier evaluation of the
    /// same coordinates, keeping this point's generator metadata.
    pub(crate) fn adopt(&mut self, done: &EvalPoint) -> bool {
        if self.status.is_done() || !done.status.is_done() {
            return false;
        }
        self.status = done.status;
        self.output = done.output.clone();
        self.f = done.f;
        self.h = done.h;
        self.tag = done.tag;
        self.message = done.message.clone();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints() -> Constraints {
        Constraints::new(
            vec![ConstraintKind::Progressive, ConstraintKind::Progressive],
            HNorm::L2,
        )
    }

    #[test]
    fn test_compute_h_norms() {
        let values = [3.0, -1.0];
        assert_eq!(constraints().compute_h(&values), Some(9.0));
        let l1 = Constraints::new(vec![ConstraintKind::Progressive; 2], HNorm::L1);
        assert_eq!(l1.compute_h(&[3.0, 2.0]), Some(5.0));
        let linf = Constraints::new(vec![ConstraintKind::Progressive; 2], HNorm::Linf);
        assert_eq!(linf.compute_h(&[3.0, 2.0]), Some(3.0));
        assert_eq!(constraints().compute_h(&[1.0]), None);
    }

    #[test]
    fn test_extreme_violation_is_infinite() {
        let c = Constraints::new(
            vec![ConstraintKind::Progressive, ConstraintKind::Extreme],
            HNorm::L2,
        );
        assert_eq!(c.compute_h(&[0.5, 1e-9]), Some(f64::INFINITY));
        assert_eq!(c.compute_h(&[0.5, 0.0]), Some(0.25));
    }

    #[test]
    fn test_status_is_monotonic() {
        let mut p = EvalPoint::new(Point::new(vec![0.0]), StepType::Poll);
        assert!(p.set_in_progress());
        assert!(!p.set_in_progress());
        assert!(p.record(Ok(BbOutput::new(1.0, vec![-1.0, 2.0])), &constraints()));
        assert_eq!(p.status(), EvalStatus::EvalOk);
        assert_eq!(p.h(), Some(4.0));
        assert!(!p.is_feasible(0.0));

        assert!(!p.record(Err(EvaluationError::Failed("late".into())), &constraints()));
        assert_eq!(p.status(), EvalStatus::EvalOk);
        assert!(!p.set_in_progress());
    }

    #[test]
    fn test_invalid_output_is_an_error() {
        let mut p = EvalPoint::new(Point::new(vec![0.0]), StepType::Poll);
        p.record(Ok(BbOutput::new(f64::NAN, vec![0.0, 0.0])), &constraints());
        assert_eq!(p.status(), EvalStatus::EvalError);
        assert_eq!(p.f(), None);

        let mut q = EvalPoint::new(Point::new(vec![0.0]), StepType::Poll);
        q.record(Err(EvaluationError::Failed("diverged".into())), &constraints());
        assert_eq!(q.status(), EvalStatus::EvalFailed);
        assert!(q.message().unwrap().contains("diverged"));
    }

    #[test]
    fn test_direction_from_center() {
        let center = Point::new(vec![1.0, 1.0]);
        let p = EvalPoint::new(Point::new(vec![2.0, 1.0]), StepType::Poll).with_point_from(&center);
        assert_eq!(p.direction().unwrap().coords(), &[1.0, 0.0]);
    }
}
