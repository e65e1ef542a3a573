//! Model search: fit a cheap surrogate on nearby evaluations and propose the
//! point it predicts best.
//!
//! Candidates are sampled in a trust box around the frame center and
//! evaluated on the model through the evaluator control, with
//! [`EvalType::Model`]. Those evaluations count against `max_model_eval`,
//! never against the blackbox budgets, and are never cached.

use std::fmt;

use tracing::{debug, warn};

use crate::algo::{FrameContext, TrialPointGenerator};
use crate::error::{MadsError, Result};
use crate::eval::{compute_success_type, BbOutput, EvalPoint, EvalType, StepType, SuccessType};
use crate::evaluator::{Batch, EvaluationError, Evaluator};
use crate::point::Point;
use crate::rng::RandomNumberGenerator;
use crate::stop::{ModelStop, Phase, StopReason};

/// A surrogate of the blackbox fitted on evaluated points.
pub trait SurrogateModel: Send + Sync {
    /// Fits the model on successful blackbox evaluations.
    fn fit(&mut self, points: &[EvalPoint]) -> Result<()>;

    /// Predicts the blackbox output at `x`.
    fn predict(&self, x: &Point) -> std::result::Result<BbOutput, EvaluationError>;

    /// Fewest points a fit needs in dimension `n`.
    fn min_points(&self, n: usize) -> usize {
        n + 1
    }
}

/// Shepard interpolation: predictions are averages of the known outputs
/// weighted by inverse squared distance.
#[derive(Debug, Clone, Default)]
pub struct InverseDistanceModel {
    samples: Vec<(Point, BbOutput)>,
}

impl InverseDistanceModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SurrogateModel for InverseDistanceModel {
    fn fit(&mut self, points: &[EvalPoint]) -> Result<()> {
        self.samples = points
            .iter()
            .filter(|p| p.is_ok())
            .filter_map(|p| p.output().map(|out| (p.point().clone(), out.clone())))
            .collect();
        let width = self.samples.first().map(|(_, out)| out.constraints().len());
        if self
            .samples
            .iter()
            .any(|(_, out)| Some(out.constraints().len()) != width)
        {
            return Err(MadsError::Generation(
                "model samples disagree on the number of constraints".to_string(),
            ));
        }
        if self.samples.is_empty() {
            return Err(MadsError::Generation("no sample to fit".to_string()));
        }
        Ok(())
    }

    fn predict(&self, x: &Point) -> std::result::Result<BbOutput, EvaluationError> {
        let m = match self.samples.first() {
            Some((_, out)) => out.constraints().len(),
            None => return Err(EvaluationError::Failed("model is not fitted".to_string())),
        };
        let mut total = 0.0;
        let mut f = 0.0;
        let mut c = vec![0.0; m];
        for (p, out) in &self.samples {
            let d2: f64 = p
                .coords()
                .iter()
                .zip(x.coords())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            if d2 == 0.0 {
                return Ok(out.clone());
            }
            let w = 1.0 / d2;
            total += w;
            f += w * out.objective();
            c.iter_mut()
                .zip(out.constraints())
                .for_each(|(acc, v)| *acc += w * v);
        }
        c.iter_mut().for_each(|v| *v /= total);
        Ok(BbOutput::new(f / total, c))
    }

    fn min_points(&self, _n: usize) -> usize {
        2
    }
}

/// Lets the evaluator control drive a model.
struct ModelEvaluator<'m> {
    model: &'m dyn SurrogateModel,
}

impl Evaluator for ModelEvaluator<'_> {
    fn evaluate(&self, x: &Point, _eval_type: EvalType) -> std::result::Result<BbOutput, EvaluationError> {
        self.model.predict(x)
    }
}

/// Fits on cache points within `fit_factor` frame sizes of the center and
/// samples candidates within one frame size. Candidates already evaluated by
/// the blackbox are discarded before the model sees them.
pub struct ModelSearch {
    model: Box<dyn SurrogateModel>,
    candidates: usize,
    fit_factor: f64,
    stop: StopReason,
}

impl fmt::Debug for ModelSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSearch")
            .field("candidates", &self.candidates)
            .field("fit_factor", &self.fit_factor)
            .field("stop", &self.stop)
            .finish()
    }
}

impl ModelSearch {
    pub fn new(model: Box<dyn SurrogateModel>, candidates: usize) -> Self {
        Self {
            model,
            candidates: candidates.max(1),
            fit_factor: 4.0,
            stop: StopReason::started(Phase::Model),
        }
    }

    pub fn with_fit_factor(mut self, factor: f64) -> Self {
        self.fit_factor = factor;
        self
    }

    fn sample_candidates(&self, ctx: &FrameContext<'_>, rng: &mut RandomNumberGenerator) -> Vec<EvalPoint> {
        let center = ctx.center.point();
        (0..self.candidates)
            .map(|_| {
                let coords: Vec<f64> = (0..ctx.dimension())
                    .map(|i| {
                        if ctx.is_free(i) {
                            let r = ctx.mesh.delta_frame(i);
                            center[i] + r * (2.0 * rng.unit() - 1.0)
                        } else {
                            center[i]
                        }
                    })
                    .collect();
                let x = ctx.bounds.snap(&ctx.mesh.project_on_mesh(&Point::new(coords), center));
                EvalPoint::new(x, StepType::ModelSearch).with_point_from(center)
            })
            .collect()
    }
}

impl TrialPointGenerator for ModelSearch {
    fn name(&self) -> &'static str {
        "ModelSearch"
    }

    fn generate(
        &mut self,
        ctx: &FrameContext<'_>,
        rng: &mut RandomNumberGenerator,
    ) -> Vec<EvalPoint> {
        let n = ctx.dimension();
        let center = ctx.center.point();
        let radius: Vec<f64> = (0..n)
            .map(|i| {
                if ctx.is_free(i) {
                    self.fit_factor * ctx.mesh.delta_frame(i)
                } else {
                    0.0
                }
            })
            .collect();
        let nearby = ctx.evc.cache().find_within(center, &radius);
        let free = (0..n).filter(|&i| ctx.is_free(i)).count();
        if nearby.len() < self.model.min_points(free) {
            self.stop.set(ModelStop::NotEnoughPoints);
            return Vec::new();
        }
        if let Err(e) = self.model.fit(&nearby) {
            warn!(error = %e, "model fit failed");
            self.stop.set(ModelStop::InitialFail);
            return Vec::new();
        }

        let mut candidates = self.sample_candidates(ctx, rng);
        candidates.retain(|p| {
            p.point() != center && ctx.evc.cache().get(p.point(), EvalType::Blackbox).is_none()
        });
        if candidates.is_empty() {
            self.stop.set(ModelStop::NoNewPointsFound);
            return Vec::new();
        }
        let adapter = ModelEvaluator {
            model: self.model.as_ref(),
        };
        let predicted = ctx.evc.run_with(
            Batch::new(candidates).eval_type(EvalType::Model).opportunistic(false),
            &adapter,
            rng,
        );

        let mut best: Option<(SuccessType, f64, &EvalPoint)> = None;
        for p in predicted.points.iter().filter(|p| p.is_ok()) {
            let s = compute_success_type(p, ctx.barrier);
            let f = p.f().unwrap_or(f64::INFINITY);
            if best.map_or(true, |(bs, bf, _)| s > bs || (s == bs && f < bf)) {
                best = Some((s, f, p));
            }
        }
        let Some((success, f, best)) = best else {
            self.stop.set(ModelStop::EvalFail);
            return Vec::new();
        };
        let x = best.point().clone();
        if success < SuccessType::PartialSuccess {
            debug!(?success, "model predicts no improvement");
            self.stop.set(ModelStop::NoNewPointsFound);
            return Vec::new();
        }
        debug!(predicted_f = f, "model candidate");
        self.stop.set(ModelStop::SinglePassCompleted);
        vec![EvalPoint::new(x, StepType::ModelSearch).with_point_from(center)]
    }

    fn stop_reason(&self) -> StopReason {
        self.stop
    }

    fn reset(&mut self) {
        self.stop.reset();
    }
}
