//! Latin hypercube search over the bounded box.

use tracing::debug;

use crate::algo::{FrameContext, TrialPointGenerator};
use crate::eval::{EvalPoint, StepType};
use crate::point::Point;
use crate::rng::RandomNumberGenerator;
use crate::stop::{LhStop, Phase, StopReason};

/// Samples `p` points so that, for every free variable, each of the `p`
/// equal strata of `[lower, upper]` holds exactly one point.
///
/// `initial` points are drawn at the first call and `per_iteration` at every
/// later one. Variables outside the free set take the center's values.
#[derive(Debug, Clone)]
pub struct LatinHypercubeSearch {
    initial: usize,
    per_iteration: usize,
    initial_done: bool,
    stop: StopReason,
}

impl LatinHypercubeSearch {
    pub fn new(initial: usize, per_iteration: usize) -> Self {
        Self {
            initial,
            per_iteration,
            initial_done: false,
            stop: StopReason::started(Phase::LatinHypercube),
        }
    }

    fn count(&mut self) -> usize {
        if self.initial_done {
            self.per_iteration
        } else {
            self.initial_done = true;
            self.initial
        }
    }
}

/// `p` samples of a Latin hypercube over `[lower[i], upper[i]]`.
pub fn sample(
    lower: &[f64],
    upper: &[f64],
    p: usize,
    rng: &mut RandomNumberGenerator,
) -> Vec<Vec<f64>> {
    let mut samples = vec![vec![0.0; lower.len()]; p];
    for (i, (lo, hi)) in lower.iter().zip(upper).enumerate() {
        let width = (hi - lo) / p as f64;
        for (sample, stratum) in samples.iter_mut().zip(rng.permutation(p)) {
            sample[i] = lo + (stratum as f64 + rng.unit()) * width;
        }
    }
    samples
}

impl TrialPointGenerator for LatinHypercubeSearch {
    fn name(&self) -> &'static str {
        "LatinHypercubeSearch"
    }

    fn generate(
        &mut self,
        ctx: &FrameContext<'_>,
        rng: &mut RandomNumberGenerator,
    ) -> Vec<EvalPoint> {
        let p = self.count();
        let n = ctx.dimension();
        let vars: Vec<usize> = (0..n).filter(|&i| ctx.is_free(i)).collect();
        let lower: Vec<f64> = vars.iter().map(|&i| ctx.bounds.lower()[i]).collect();
        let upper: Vec<f64> = vars.iter().map(|&i| ctx.bounds.upper()[i]).collect();

        if p == 0 || vars.is_empty() || lower.iter().chain(&upper).any(|b| !b.is_finite()) {
            debug!(p, "latin hypercube needs finite bounds on every free variable");
            self.stop.set(LhStop::NoPointsGenerated);
            return Vec::new();
        }

        let center = ctx.center.point();
        let points = sample(&lower, &upper, p, rng)
            .into_iter()
            .map(|values| {
                let mut coords = center.coords().to_vec();
                for (&i, v) in vars.iter().zip(values) {
                    coords[i] = v;
                }
                EvalPoint::new(Point::new(coords), StepType::LhSearch).with_point_from(center)
            })
            .collect();
        self.stop.set(LhStop::AllPointsEvaluated);
        points
    }

    fn stop_reason(&self) -> StopReason {
        self.stop
    }

    fn reset(&mut self) {
        self.stop.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{Barrier, BbOutput, Constraints};
    use crate::evaluator::{EvaluationError, Evaluator, EvaluatorControl, FnEvaluator};
    use crate::mesh::Mesh;
    use crate::options::EvaluatorOptions;
    use crate::point::Bounds;
    use std::sync::Arc;

    #[test]
    fn test_one_point_per_stratum() {
        let mut rng = RandomNumberGenerator::from_seed(4);
        let samples = sample(&[0.0, -5.0], &[1.0, 5.0], 10, &mut rng);
        assert_eq!(samples.len(), 10);
        for (i, (lo, hi)) in [(0.0, 1.0), (-5.0, 5.0)].into_iter().enumerate() {
            let mut strata: Vec<usize> = samples
                .iter()
                .map(|s| ((s[i] - lo) / (hi - lo) * 10.0).floor() as usize)
                .collect();
            strata.sort_unstable();
            assert_eq!(strata, (0..10).collect::<Vec<_>>());
        }
    }

    fn context_run(bounds: Bounds, search: &mut LatinHypercubeSearch) -> Vec<EvalPoint> {
        let eval: Arc<dyn Evaluator> = Arc::new(FnEvaluator::new(|x: &Point| {
            Ok::<_, EvaluationError>(BbOutput::unconstrained(x[0]))
        }));
        let evc = EvaluatorControl::new(eval, Constraints::default(), EvaluatorOptions::default()).unwrap();
        let mesh = Mesh::new(&[1.0, 1.0, 1.0], &[0.0; 3]).unwrap();
        let barrier = Barrier::new(0.0, 10);
        let center = EvalPoint::new(Point::new(vec![0.5, 0.5, 0.5]), StepType::X0);
        let free = [0usize, 2];
        let ctx = FrameContext {
            center: &center,
            mesh: &mesh,
            bounds: &bounds,
            barrier: &barrier,
            evc: &evc,
            last_direction: None,
            iteration: 1,
            free_vars: Some(&free),
        };
        let mut rng = RandomNumberGenerator::from_seed(0);
        search.generate(&ctx, &mut rng)
    }

    #[test]
    fn test_initial_then_per_iteration() {
        let bounds = Bounds::new(vec![0.0; 3], vec![1.0; 3]).unwrap();
        let mut search = LatinHypercubeSearch::new(6, 2);

        let first = context_run(bounds.clone(), &mut search);
        assert_eq!(first.len(), 6);
        assert!(first.iter().all(|p| p.point()[1] == 0.5));
        assert!(search.stop_reason().is(LhStop::AllPointsEvaluated));

        search.reset();
        assert_eq!(context_run(bounds, &mut search).len(), 2);
    }

    #[test]
    fn test_unbounded_variable_generates_nothing() {
        let bounds = Bounds::new(vec![0.0, 0.0, f64::NEG_INFINITY], vec![1.0; 3]).unwrap();
        let mut search = LatinHypercubeSearch::new(5, 5);
        assert!(context_run(bounds, &mut search).is_empty());
        assert!(search.stop_reason().is(LhStop::NoPointsGenerated));
    }
}
