//! Classification of a fresh evaluation against the incumbents.

use super::{Barrier, EvalPoint, EvalStatus};

/// How much an evaluated point improves on the barrier. The derived order
/// goes from least to most successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SuccessType {
    #[default]
    NotEvaluated,
    NoSuccess,
    /// Enters the infeasible Pareto front.
    PartialSuccess,
    /// New best feasible point.
    FullSuccess,
}

/// `a` dominates `b` in the `(h, f)` sense.
pub fn dominates(a: (f64, f64), b: (f64, f64)) -> bool {
    a.0 <= b.0 && a.1 <= b.1 && (a.0 < b.0 || a.1 < b.1)
}

/// Classifies `candidate` against `barrier` without modifying it.
///
/// - a feasible point is a full success when there is no feasible incumbent
///   or when it strictly decreases `f`;
/// - an infeasible point with `h <= h_max` is a partial success when no
///   member of the infeasible front dominates or equals it;
/// - failed evaluations are never a success.
pub fn compute_success_type(candidate: &EvalPoint, barrier: &Barrier) -> SuccessType {
    match candidate.status() {
        EvalStatus::NotEvaluated | EvalStatus::InProgress => return SuccessType::NotEvaluated,
        EvalStatus::EvalFailed | EvalStatus::EvalError => return SuccessType::NoSuccess,
        EvalStatus::EvalOk => {}
    }
    let (f, h) = match (candidate.f(), candidate.h()) {
        (Some(f), Some(h)) => (f, h),
        _ => return SuccessType::NoSuccess,
    };
    if h.is_infinite() || h.is_nan() {
        return SuccessType::NoSuccess;
    }

    if h <= barrier.h_tolerance() {
        return match barrier.best_feasible().and_then(EvalPoint::f) {
            Some(best) if f >= best => SuccessType::NoSuccess,
            _ => SuccessType::FullSuccess,
        };
    }

    if h > barrier.h_max() {
        return SuccessType::NoSuccess;
    }
    let blocked = barrier.infeasible().iter().any(|inc| {
        match (inc.h(), inc.f()) {
            (Some(ih), Some(if_)) => ih <= h && if_ <= f,
            _ => false,
        }
    });
    if blocked {
        SuccessType::NoSuccess
    } else {
        SuccessType::PartialSuccess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{BbOutput, ConstraintKind, Constraints, HNorm, StepType};
    use crate::evaluator::EvaluationError;
    use crate::point::Point;

    fn evaluated(x: f64, f: f64, c: f64) -> EvalPoint {
        let constraints = Constraints::new(vec![ConstraintKind::Progressive], HNorm::L1);
        let mut p = EvalPoint::new(Point::new(vec![x]), StepType::Poll);
        p.record(Ok(BbOutput::new(f, vec![c])), &constraints);
        p
    }

    #[test]
    fn test_dominates() {
        assert!(dominates((0.0, 1.0), (0.0, 2.0)));
        assert!(!dominates((0.0, 1.0), (0.0, 1.0)));
        assert!(!dominates((1.0, 0.0), (0.0, 1.0)));
    }

    #[test]
    fn test_feasible_success() {
        let mut barrier = Barrier::new(0.0, 10);
        assert_eq!(
            compute_success_type(&evaluated(0.0, 5.0, -1.0), &barrier),
            SuccessType::FullSuccess
        );
        barrier.insert(&evaluated(0.0, 5.0, -1.0));
        assert_eq!(
            compute_success_type(&evaluated(1.0, 5.0, -1.0), &barrier),
            SuccessType::NoSuccess
        );
        assert_eq!(
            compute_success_type(&evaluated(1.0, 4.0, -1.0), &barrier),
            SuccessType::FullSuccess
        );
    }

    #[test]
    fn test_infeasible_is_at_most_partial() {
        let mut barrier = Barrier::new(0.0, 10);
        barrier.insert(&evaluated(0.0, 5.0, 2.0));
        // Dominates the incumbent: still only partial.
        assert_eq!(
            compute_success_type(&evaluated(1.0, 4.0, 1.0), &barrier),
            SuccessType::PartialSuccess
        );
        // Trade-off: enters the front.
        assert_eq!(
            compute_success_type(&evaluated(2.0, 3.0, 3.0), &barrier),
            SuccessType::PartialSuccess
        );
        assert_eq!(
            compute_success_type(&evaluated(3.0, 6.0, 2.5), &barrier),
            SuccessType::NoSuccess
        );
    }

    #[test]
    fn test_failures_never_succeed() {
        let barrier = Barrier::new(0.0, 10);
        let constraints = Constraints::new(vec![ConstraintKind::Progressive], HNorm::L1);
        let mut p = EvalPoint::new(Point::new(vec![0.0]), StepType::Poll);
        assert_eq!(compute_success_type(&p, &barrier), SuccessType::NotEvaluated);
        p.record(Err(EvaluationError::Failed("no".into())), &constraints);
        assert_eq!(compute_success_type(&p, &barrier), SuccessType::NoSuccess);
    }
}
