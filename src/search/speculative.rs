//! Speculative search: keep going in the direction that just worked.

use crate::algo::{FrameContext, TrialPointGenerator};
use crate::eval::{EvalPoint, StepType};
use crate::rng::RandomNumberGenerator;
use crate::stop::{Phase, SearchStop, StopReason};

/// Proposes `center + k * d` for `k = 1..=max_points`, where `d` is the
/// direction of the last success, or the displacement that produced the
/// center when no success direction is known.
#[derive(Debug, Clone)]
pub struct SpeculativeSearch {
    max_points: usize,
    stop: StopReason,
}

impl SpeculativeSearch {
    pub fn new(max_points: usize) -> Self {
        Self {
            max_points: max_points.max(1),
            stop: StopReason::started(Phase::Search),
        }
    }
}

impl TrialPointGenerator for SpeculativeSearch {
    fn name(&self) -> &'static str {
        "SpeculativeSearch"
    }

    fn generate(
        &mut self,
        ctx: &FrameContext<'_>,
        _rng: &mut RandomNumberGenerator,
    ) -> Vec<EvalPoint> {
        let direction = ctx
            .last_direction
            .cloned()
            .or_else(|| ctx.center.direction())
            .filter(|d| !d.is_zero() && d.dim() == ctx.dimension());
        let Some(direction) = direction else {
            self.stop.set(SearchStop::NoPointsGenerated);
            return Vec::new();
        };

        let center = ctx.center.point();
        let points: Vec<EvalPoint> = (1..=self.max_points)
            .filter_map(|k| center.offset(&direction.scaled(k as f64)).ok())
            .map(|x| EvalPoint::new(x, StepType::SpeculativeSearch).with_point_from(center))
            .collect();
        if points.is_empty() {
            self.stop.set(SearchStop::NoPointsGenerated);
        } else {
            self.stop.set(SearchStop::PassCompleted);
        }
        points
    }

    fn stop_reason(&self) -> StopReason {
        self.stop
    }

    fn reset(&mut self) {
        self.stop.reset();
    }
}
