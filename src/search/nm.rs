//! Nelder-Mead search: one reflective pass over a simplex of cached points.
//!
//! The simplex is built from successful blackbox evaluations near the frame
//! center. Points are ranked feasible first by objective, then infeasible by
//! violation, and accepted greedily while they keep the simplex affinely
//! independent. The worst vertex is then reflected through the centroid of
//! the others, and the expansion and both contractions along the same line
//! are proposed as well.

use std::cmp::Ordering;

use tracing::debug;

use crate::algo::{FrameContext, TrialPointGenerator};
use crate::eval::{EvalPoint, EvalType, StepType};
use crate::options::NelderMeadOptions;
use crate::point::Point;
use crate::rng::RandomNumberGenerator;
use crate::stop::{NmStop, Phase, StopReason};

/// Relative residual a candidate vertex must keep after projection on the
/// span of the accepted edges.
const RANK_EPS: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct NelderMeadSearch {
    options: NelderMeadOptions,
    stop: StopReason,
}

impl NelderMeadSearch {
    pub fn new(options: NelderMeadOptions) -> Self {
        Self {
            options,
            stop: StopReason::started(Phase::NelderMead),
        }
    }

    pub fn options(&self) -> &NelderMeadOptions {
        &self.options
    }
}

/// Feasible points by increasing `f`, then infeasible ones by increasing `h`.
fn rank(points: &mut [EvalPoint], h_tolerance: f64) {
    points.sort_by(|a, b| {
        let key = |p: &EvalPoint| {
            let feasible = p.is_feasible(h_tolerance);
            let primary = if feasible { p.f() } else { p.h() };
            (!feasible, primary.unwrap_or(f64::INFINITY))
        };
        let (fa, va) = key(a);
        let (fb, vb) = key(b);
        fa.cmp(&fb)
            .then(va.partial_cmp(&vb).unwrap_or(Ordering::Equal))
            .then(a.tag().cmp(&b.tag()))
    });
}

/// Greedily picks up to `vars.len() + 1` affinely independent vertices among
/// `ranked`, in order. Only the coordinates in `vars` are considered.
pub fn build_simplex(ranked: &[EvalPoint], vars: &[usize]) -> Vec<EvalPoint> {
    let Some(first) = ranked.first() else {
        return Vec::new();
    };
    let origin: Vec<f64> = vars.iter().map(|&i| first.point()[i]).collect();
    let mut basis: Vec<Vec<f64>> = Vec::new();
    let mut simplex = vec![first.clone()];

    for p in &ranked[1..] {
        if simplex.len() == vars.len() + 1 {
            break;
        }
        let edge: Vec<f64> = vars
            .iter()
            .zip(&origin)
            .map(|(&i, o)| p.point()[i] - o)
            .collect();
        let norm = edge.iter().map(|e| e * e).sum::<f64>().sqrt();
        if norm == 0.0 {
            continue;
        }
        let mut residual = edge;
        for b in &basis {
            let dot: f64 = residual.iter().zip(b).map(|(r, b)| r * b).sum();
            residual.iter_mut().zip(b).for_each(|(r, b)| *r -= dot * b);
        }
        let res_norm = residual.iter().map(|r| r * r).sum::<f64>().sqrt();
        if res_norm / norm > RANK_EPS {
            basis.push(residual.into_iter().map(|r| r / res_norm).collect());
            simplex.push(p.clone());
        }
    }
    simplex
}

impl TrialPointGenerator for NelderMeadSearch {
    fn name(&self) -> &'static str {
        "NelderMeadSearch"
    }

    fn generate(
        &mut self,
        ctx: &FrameContext<'_>,
        _rng: &mut RandomNumberGenerator,
    ) -> Vec<EvalPoint> {
        let n = ctx.dimension();
        let center = ctx.center.point();
        let vars: Vec<usize> = (0..n).filter(|&i| ctx.is_free(i)).collect();
        let radius: Vec<f64> = (0..n)
            .map(|i| {
                if ctx.is_free(i) {
                    self.options.include_factor * ctx.mesh.delta_frame(i)
                } else {
                    0.0
                }
            })
            .collect();

        let mut nearby = ctx.evc.cache().find_within(center, &radius);
        if vars.is_empty() || nearby.len() < 2 {
            self.stop.set(NmStop::InitialFailed);
            return Vec::new();
        }
        rank(&mut nearby, ctx.barrier.h_tolerance());
        let simplex = build_simplex(&nearby, &vars);
        if simplex.len() < vars.len() + 1 {
            debug!(vertices = simplex.len(), needed = vars.len() + 1, "simplex rank insufficient");
            self.stop.set(NmStop::SimplexRankInsufficient);
            return Vec::new();
        }

        let (worst, rest) = match simplex.split_last() {
            Some(split) => split,
            None => return Vec::new(),
        };
        let mut centroid = vec![0.0; n];
        for p in rest {
            centroid.iter_mut().zip(p.point().coords()).for_each(|(c, x)| *c += x);
        }
        centroid.iter_mut().for_each(|c| *c /= rest.len() as f64);

        let coefficients = [
            1.0,
            self.options.delta_e,
            self.options.delta_oc,
            self.options.delta_ic,
        ];
        let mut points = Vec::new();
        let mut fresh = 0;
        for delta in coefficients {
            let coords: Vec<f64> = (0..n)
                .map(|i| {
                    if ctx.is_free(i) {
                        centroid[i] + delta * (centroid[i] - worst.point()[i])
                    } else {
                        center[i]
                    }
                })
                .collect();
            let x = ctx
                .bounds
                .snap(&ctx.mesh.project_on_mesh(&Point::new(coords), center));
            if ctx.evc.cache().get(&x, EvalType::Blackbox).is_none() {
                fresh += 1;
            }
            points.push(EvalPoint::new(x, StepType::NmSearch).with_point_from(center));
        }

        if fresh == 0 {
            self.stop.set(NmStop::NoNewPoints);
            return Vec::new();
        }
        self.stop.set(NmStop::SingleCompleted);
        points
    }

    fn stop_reason(&self) -> StopReason {
        self.stop
    }

    fn reset(&mut self) {
        self.stop.reset();
    }
}
