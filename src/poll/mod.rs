//! # Poll
//!
//! The poll proposes points around the frame center along a set of
//! directions. Each direction is scaled to the frame and rounded on the mesh,
//! added to the center, snapped into the bounds and projected on the mesh
//! again. Duplicates and the center itself are dropped.
//!
//! When directions cannot be built, the poll records `DIRECTION_FAILURE` in
//! its own stop reason and proposes nothing; the iteration carries on with
//! whatever the search found.

pub mod directions;

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::algo::{FrameContext, TrialPointGenerator};
use crate::caching::CacheKey;
use crate::error::Result;
use crate::eval::{EvalPoint, StepType};
use crate::mesh::Mesh;
use crate::point::{Bounds, Point};
use crate::rng::RandomNumberGenerator;
use crate::stop::{Phase, PollStop, StopReason};

/// How poll directions are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PollStrategy {
    /// One random unit direction and its opposite.
    Double,
    /// `n` orthogonal directions from a random Householder basis and the
    /// negative of their sum.
    NPlus1,
    /// The `2n` coordinate directions; deterministic.
    #[default]
    Ortho2N,
    /// The columns of a random Householder basis and their opposites.
    Random2N,
}

#[derive(Debug, Clone)]
pub struct Poll {
    strategy: PollStrategy,
    stop: StopReason,
}

impl Poll {
    pub fn new(strategy: PollStrategy) -> Self {
        Self {
            strategy,
            stop: StopReason::started(Phase::Poll),
        }
    }

    pub fn strategy(&self) -> PollStrategy {
        self.strategy
    }

    /// Poll points around `center`.
    ///
    /// # Arguments
    ///
    /// * `center` - The frame center, every coordinate defined.
    /// * `free_vars` - Variables the poll may move, all of them when `None`.
    pub fn generate_around(
        &mut self,
        center: &Point,
        mesh: &Mesh,
        bounds: &Bounds,
        free_vars: Option<&[usize]>,
        rng: &mut RandomNumberGenerator,
    ) -> Vec<EvalPoint> {
        match self.try_generate(center, mesh, bounds, free_vars, rng) {
            Ok(points) => {
                if points.is_empty() {
                    self.stop.set(PollStop::NoPointsGenerated);
                }
                debug!(strategy = ?self.strategy, count = points.len(), "poll points");
                points
            }
            Err(e) => {
                warn!(error = %e, "poll direction generation failed");
                self.stop.set(PollStop::DirectionFailure);
                Vec::new()
            }
        }
    }

    fn try_generate(
        &self,
        center: &Point,
        mesh: &Mesh,
        bounds: &Bounds,
        free_vars: Option<&[usize]>,
        rng: &mut RandomNumberGenerator,
    ) -> Result<Vec<EvalPoint>> {
        let n = center.dim();
        let all: Vec<usize>;
        let vars = match free_vars {
            Some(vars) => vars,
            None => {
                all = (0..n).collect();
                &all
            }
        };

        let mut seen = HashSet::new();
        seen.insert(center.cache_key());
        let mut points = Vec::new();
        for dir in directions::generate(self.strategy, vars.len(), rng)? {
            let step = mesh.scale_and_project(&dir.embed(n, vars))?;
            let x = bounds.snap(&center.offset(&step)?);
            let x = bounds.snap(&mesh.project_on_mesh(&x, center));
            if seen.insert(x.cache_key()) {
                points.push(EvalPoint::new(x, StepType::Poll).with_point_from(center));
            }
        }
        Ok(points)
    }
}

impl TrialPointGenerator for Poll {
    fn name(&self) -> &'static str {
        "Poll"
    }

    fn generate(
        &mut self,
        ctx: &FrameContext<'_>,
        rng: &mut RandomNumberGenerator,
    ) -> Vec<EvalPoint> {
        self.generate_around(ctx.center.point(), ctx.mesh, ctx.bounds, ctx.free_vars, rng)
    }

    fn stop_reason(&self) -> StopReason {
        self.stop
    }

    fn reset(&mut self) {
        self.stop.reset();
    }
}
