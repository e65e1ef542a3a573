//! # Options
//!
//! Configuration of a run, split the way the engine uses it:
//!
//! - [`Problem`]: dimension, starting points, bounds, constraint kinds and
//!   granularity.
//! - [`EvaluatorOptions`]: worker pool, block size, dispatch order and the
//!   global evaluation budgets.
//! - [`MadsOptions`]: the iteration loop, mesh, poll, search, barrier and
//!   space decomposition settings, with an embedded [`EvaluatorOptions`].
//!
//! Each struct has a fluent builder whose `build()` validates the values and
//! fills in defaults.
//!
//! ## Example
//!
//! ```rust
//! use mads::options::{EvaluatorOptions, MadsOptions, Problem};
//! use mads::point::Point;
//! use mads::poll::PollStrategy;
//!
//! let problem = Problem::builder()
//!     .x0(Point::new(vec![1.0, 1.0]))
//!     .bounds(vec![-5.0, -5.0], vec![5.0, 5.0])
//!     .build()
//!     .unwrap();
//!
//! let options = MadsOptions::builder()
//!     .seed(7)
//!     .max_iterations(100)
//!     .poll_strategy(PollStrategy::Ortho2N)
//!     .evaluator(EvaluatorOptions::builder().workers(4).max_bb_eval(500).build().unwrap())
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(problem.get_dimension(), 2);
//! assert_eq!(options.get_evaluator().get_workers(), 4);
//! ```

use std::time::Duration;

use crate::error::{MadsError, Result};
use crate::eval::barrier::DEFAULT_MAX_INFEASIBLE;
use crate::eval::{ConstraintKind, Constraints, HNorm};
use crate::evaluator::EvalSortType;
use crate::mesh::DEFAULT_ANISOTROPY_FACTOR;
use crate::point::{Bounds, Point};
use crate::poll::PollStrategy;
use crate::search::SearchTieBreak;

fn invalid(message: impl Into<String>) -> MadsError {
    MadsError::Configuration(message.into())
}

fn check_sizes(name: &str, sizes: &Option<Vec<f64>>) -> Result<()> {
    match sizes {
        Some(v) if v.iter().any(|&s| !(s > 0.0) || !s.is_finite()) => Err(invalid(format!(
            "{} must be positive and finite",
            name
        ))),
        _ => Ok(()),
    }
}

/// The optimization problem.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Problem {
    dimension: usize,
    x0s: Vec<Point>,
    bounds: Bounds,
    constraint_kinds: Vec<ConstraintKind>,
    h_norm: HNorm,
    granularity: Vec<f64>,
}

impl Problem {
    pub fn builder() -> ProblemBuilder {
        ProblemBuilder::default()
    }

    pub fn get_dimension(&self) -> usize {
        self.dimension
    }

    /// Starting points. They are checked when a run initializes, so an
    /// invalid starting point is reported through the stop reasons.
    pub fn get_x0s(&self) -> &[Point] {
        &self.x0s
    }

    pub fn get_bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn get_constraint_kinds(&self) -> &[ConstraintKind] {
        &self.constraint_kinds
    }

    pub fn get_h_norm(&self) -> HNorm {
        self.h_norm
    }

    /// Granularity per variable, `0` for continuous variables.
    pub fn get_granularity(&self) -> &[f64] {
        &self.granularity
    }

    pub fn constraints(&self) -> Constraints {
        Constraints::new(self.constraint_kinds.clone(), self.h_norm)
    }

    /// Replaces the starting points.
    pub fn set_x0s(&mut self, x0s: Vec<Point>) {
        self.x0s = x0s;
    }
}

/// Builder for [`Problem`].
#[derive(Debug, Clone, Default)]
pub struct ProblemBuilder {
    dimension: Option<usize>,
    x0s: Vec<Point>,
    bounds: Option<(Vec<f64>, Vec<f64>)>,
    constraint_kinds: Option<Vec<ConstraintKind>>,
    h_norm: Option<HNorm>,
    granularity: Option<Vec<f64>>,
}

impl ProblemBuilder {
    /// Sets the dimension. Defaults to the dimension of the first starting
    /// point.
    pub fn dimension(mut self, value: usize) -> Self {
        self.dimension = Some(value);
        self
    }

    /// Adds a starting point.
    pub fn x0(mut self, value: Point) -> Self {
        self.x0s.push(value);
        self
    }

    pub fn x0s(mut self, values: Vec<Point>) -> Self {
        self.x0s.extend(values);
        self
    }

    pub fn bounds(mut self, lower: Vec<f64>, upper: Vec<f64>) -> Self {
        self.bounds = Some((lower, upper));
        self
    }

    /// Kinds of the blackbox constraints, in output order.
    pub fn constraint_kinds(mut self, value: Vec<ConstraintKind>) -> Self {
        self.constraint_kinds = Some(value);
        self
    }

    pub fn h_norm(mut self, value: HNorm) -> Self {
        self.h_norm = Some(value);
        self
    }

    pub fn granularity(mut self, value: Vec<f64>) -> Self {
        self.granularity = Some(value);
        self
    }

    /// # Errors
    ///
    /// Returns an error when there is no starting point, the dimension is zero
    /// or bounds and granularity do not match the dimension.
    pub fn build(self) -> Result<Problem> {
        let dimension = self
            .dimension
            .or_else(|| self.x0s.first().map(Point::dim))
            .ok_or_else(|| invalid("at least one starting point is required"))?;
        if dimension == 0 {
            return Err(invalid("dimension must be positive"));
        }
        if self.x0s.is_empty() {
            return Err(invalid("at least one starting point is required"));
        }

        let bounds = match self.bounds {
            Some((lower, upper)) => {
                crate::point::check_dim(dimension, lower.len())?;
                Bounds::new(lower, upper)?
            }
            None => Bounds::unbounded(dimension),
        };

        let granularity = self.granularity.unwrap_or_else(|| vec![0.0; dimension]);
        crate::point::check_dim(dimension, granularity.len())?;
        if granularity.iter().any(|&g| !(g >= 0.0) || !g.is_finite()) {
            return Err(invalid("granularity must be non-negative and finite"));
        }

        Ok(Problem {
            dimension,
            x0s: self.x0s,
            bounds,
            constraint_kinds: self.constraint_kinds.unwrap_or_default(),
            h_norm: self.h_norm.unwrap_or_default(),
            granularity,
        })
    }
}

/// Worker pool, dispatch order and evaluation budgets.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EvaluatorOptions {
    workers: usize,
    block_size: usize,
    max_bb_eval: Option<usize>,
    max_eval: Option<usize>,
    max_block_eval: Option<usize>,
    max_model_eval: Option<usize>,
    max_surrogate_eval: Option<usize>,
    sort: EvalSortType,
    opportunistic: bool,
    use_cache: bool,
}

impl EvaluatorOptions {
    pub fn builder() -> EvaluatorOptionsBuilder {
        EvaluatorOptionsBuilder::default()
    }

    pub fn get_workers(&self) -> usize {
        self.workers
    }

    /// Points handed to the evaluator per call.
    pub fn get_block_size(&self) -> usize {
        self.block_size
    }

    pub fn get_max_bb_eval(&self) -> Option<usize> {
        self.max_bb_eval
    }

    /// Limit on blackbox calls plus cache hits.
    pub fn get_max_eval(&self) -> Option<usize> {
        self.max_eval
    }

    pub fn get_max_block_eval(&self) -> Option<usize> {
        self.max_block_eval
    }

    pub fn get_max_model_eval(&self) -> Option<usize> {
        self.max_model_eval
    }

    pub fn get_max_surrogate_eval(&self) -> Option<usize> {
        self.max_surrogate_eval
    }

    pub fn get_sort(&self) -> EvalSortType {
        self.sort
    }

    /// Whether poll batches stop at the first full success.
    pub fn is_opportunistic(&self) -> bool {
        self.opportunistic
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    pub fn set_max_bb_eval(&mut self, value: Option<usize>) {
        self.max_bb_eval = value;
    }

    pub fn set_max_eval(&mut self, value: Option<usize>) {
        self.max_eval = value;
    }

    pub fn set_sort(&mut self, sort: EvalSortType) {
        self.sort = sort;
    }

    pub fn set_opportunistic(&mut self, value: bool) {
        self.opportunistic = value;
    }
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            block_size: 1,
            max_bb_eval: None,
            max_eval: None,
            max_block_eval: None,
            max_model_eval: Some(1000),
            max_surrogate_eval: None,
            sort: EvalSortType::default(),
            opportunistic: true,
            use_cache: true,
        }
    }
}

/// Builder for [`EvaluatorOptions`].
#[derive(Debug, Clone, Default)]
pub struct EvaluatorOptionsBuilder {
    workers: Option<usize>,
    block_size: Option<usize>,
    max_bb_eval: Option<usize>,
    max_eval: Option<usize>,
    max_block_eval: Option<usize>,
    max_model_eval: Option<usize>,
    max_surrogate_eval: Option<usize>,
    sort: Option<EvalSortType>,
    opportunistic: Option<bool>,
    use_cache: Option<bool>,
}

impl EvaluatorOptionsBuilder {
    pub fn workers(mut self, value: usize) -> Self {
        self.workers = Some(value);
        self
    }

    pub fn block_size(mut self, value: usize) -> Self {
        self.block_size = Some(value);
        self
    }

    pub fn max_bb_eval(mut self, value: usize) -> Self {
        self.max_bb_eval = Some(value);
        self
    }

    pub fn max_eval(mut self, value: usize) -> Self {
        self.max_eval = Some(value);
        self
    }

    pub fn max_block_eval(mut self, value: usize) -> Self {
        self.max_block_eval = Some(value);
        self
    }

    pub fn max_model_eval(mut self, value: usize) -> Self {
        self.max_model_eval = Some(value);
        self
    }

    pub fn max_surrogate_eval(mut self, value: usize) -> Self {
        self.max_surrogate_eval = Some(value);
        self
    }

    pub fn sort(mut self, value: EvalSortType) -> Self {
        self.sort = Some(value);
        self
    }

    pub fn opportunistic(mut self, value: bool) -> Self {
        self.opportunistic = Some(value);
        self
    }

    pub fn use_cache(mut self, value: bool) -> Self {
        self.use_cache = Some(value);
        self
    }

    /// # Errors
    ///
    /// Returns an error when the worker count or the block size is zero.
    pub fn build(self) -> Result<EvaluatorOptions> {
        let defaults = EvaluatorOptions::default();
        let options = EvaluatorOptions {
            workers: self.workers.unwrap_or(defaults.workers),
            block_size: self.block_size.unwrap_or(defaults.block_size),
            max_bb_eval: self.max_bb_eval,
            max_eval: self.max_eval,
            max_block_eval: self.max_block_eval,
            max_model_eval: self.max_model_eval.or(defaults.max_model_eval),
            max_surrogate_eval: self.max_surrogate_eval,
            sort: self.sort.unwrap_or(defaults.sort),
            opportunistic: self.opportunistic.unwrap_or(defaults.opportunistic),
            use_cache: self.use_cache.unwrap_or(defaults.use_cache),
        };
        if options.workers == 0 {
            return Err(invalid("workers must be positive"));
        }
        if options.block_size == 0 {
            return Err(invalid("block_size must be positive"));
        }
        Ok(options)
    }
}

/// Nelder-Mead search coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NelderMeadOptions {
    /// Expansion, greater than 1.
    pub delta_e: f64,
    /// Outside contraction, in `(0, 1]`.
    pub delta_oc: f64,
    /// Inside contraction, negative.
    pub delta_ic: f64,
    /// Simplex points are taken from the cache within this many frame sizes
    /// of the frame center.
    pub include_factor: f64,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            delta_e: 2.0,
            delta_oc: 0.5,
            delta_ic: -0.5,
            include_factor: 8.0,
        }
    }
}

/// Which search methods run, in order, before the poll.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchOptions {
    pub speculative: bool,
    /// Multiples of the last successful direction tried by the speculative
    /// search.
    pub speculative_max_points: usize,
    /// Latin hypercube points at the first iteration and at later ones.
    pub latin_hypercube: Option<(usize, usize)>,
    pub nelder_mead: Option<NelderMeadOptions>,
    /// Candidates sampled in the trust box by the model search; the model
    /// search only runs when a surrogate model is attached.
    pub model_candidates: usize,
    /// Skip the poll when a search finds a full success.
    pub opportunistic: bool,
    pub tie_break: SearchTieBreak,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            speculative: true,
            speculative_max_points: 1,
            latin_hypercube: None,
            nelder_mead: None,
            model_candidates: 20,
            opportunistic: true,
            tie_break: SearchTieBreak::default(),
        }
    }
}

/// Space decomposition settings, used by the SSD and PSD algorithms.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecompositionOptions {
    /// Variables per subproblem.
    pub subproblem_dimension: usize,
    /// Subproblems per mega-iteration; by default enough to cover every
    /// variable once.
    pub subproblems: Option<usize>,
    pub subproblem_max_bb_eval: Option<usize>,
    pub subproblem_max_iterations: Option<usize>,
    /// PSD updates the main mesh once this share of the variables, in
    /// percent, has been covered by subproblems.
    pub coverage_percent: f64,
    /// SSD stops a pass at the first subproblem success.
    pub opportunistic: bool,
}

impl Default for DecompositionOptions {
    fn default() -> Self {
        Self {
            subproblem_dimension: 2,
            subproblems: None,
            subproblem_max_bb_eval: None,
            subproblem_max_iterations: Some(10),
            coverage_percent: 70.0,
            opportunistic: true,
        }
    }
}

/// Settings of the MADS loop.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MadsOptions {
    seed: u64,
    max_iterations: Option<usize>,
    max_time: Option<Duration>,
    stop_if_feasible: bool,
    initial_frame_size: Option<Vec<f64>>,
    min_mesh_size: Option<Vec<f64>>,
    min_frame_size: Option<Vec<f64>>,
    anisotropy: Option<f64>,
    poll_strategy: PollStrategy,
    secondary_poll: bool,
    h_tolerance: f64,
    max_infeasible: usize,
    search: SearchOptions,
    decomposition: DecompositionOptions,
    evaluator: EvaluatorOptions,
}

impl MadsOptions {
    pub fn builder() -> MadsOptionsBuilder {
        MadsOptionsBuilder::default()
    }

    pub fn get_seed(&self) -> u64 {
        self.seed
    }

    pub fn get_max_iterations(&self) -> Option<usize> {
        self.max_iterations
    }

    pub fn get_max_time(&self) -> Option<Duration> {
        self.max_time
    }

    pub fn get_stop_if_feasible(&self) -> bool {
        self.stop_if_feasible
    }

    /// The initial frame size; when unset it is derived from the bounds and
    /// the starting point.
    pub fn get_initial_frame_size(&self) -> Option<&[f64]> {
        self.initial_frame_size.as_deref()
    }

    pub fn get_min_mesh_size(&self) -> Option<&[f64]> {
        self.min_mesh_size.as_deref()
    }

    pub fn get_min_frame_size(&self) -> Option<&[f64]> {
        self.min_frame_size.as_deref()
    }

    pub fn get_anisotropy(&self) -> Option<f64> {
        self.anisotropy
    }

    pub fn get_poll_strategy(&self) -> PollStrategy {
        self.poll_strategy
    }

    pub fn get_secondary_poll(&self) -> bool {
        self.secondary_poll
    }

    pub fn get_h_tolerance(&self) -> f64 {
        self.h_tolerance
    }

    pub fn get_max_infeasible(&self) -> usize {
        self.max_infeasible
    }

    pub fn get_search(&self) -> &SearchOptions {
        &self.search
    }

    pub fn get_decomposition(&self) -> &DecompositionOptions {
        &self.decomposition
    }

    pub fn get_evaluator(&self) -> &EvaluatorOptions {
        &self.evaluator
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    pub fn set_max_iterations(&mut self, value: Option<usize>) {
        self.max_iterations = value;
    }

    pub fn set_poll_strategy(&mut self, strategy: PollStrategy) {
        self.poll_strategy = strategy;
    }

    pub fn set_search(&mut self, search: SearchOptions) {
        self.search = search;
    }

    pub fn set_evaluator(&mut self, evaluator: EvaluatorOptions) {
        self.evaluator = evaluator;
    }

    /// Initial frame size for `problem`: the configured value, else a tenth
    /// of the bound range, else a tenth of `|x0|`, else 1.
    pub fn frame_size_for(&self, problem: &Problem, x0: &Point) -> Result<Vec<f64>> {
        let n = problem.get_dimension();
        if let Some(size) = &self.initial_frame_size {
            crate::point::check_dim(n, size.len())?;
            return Ok(size.clone());
        }
        let bounds = problem.get_bounds();
        Ok((0..n)
            .map(|i| {
                let range = bounds.upper()[i] - bounds.lower()[i];
                let size = if range.is_finite() && range > 0.0 {
                    range / 10.0
                } else if x0.is_defined(i) && x0[i] != 0.0 {
                    x0[i].abs() / 10.0
                } else {
                    1.0
                };
                let g = problem.get_granularity()[i];
                if g > 0.0 {
                    size.max(g)
                } else {
                    size
                }
            })
            .collect())
    }
}

impl Default for MadsOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            max_iterations: None,
            max_time: None,
            stop_if_feasible: false,
            initial_frame_size: None,
            min_mesh_size: None,
            min_frame_size: None,
            anisotropy: Some(DEFAULT_ANISOTROPY_FACTOR),
            poll_strategy: PollStrategy::default(),
            secondary_poll: true,
            h_tolerance: 0.0,
            max_infeasible: DEFAULT_MAX_INFEASIBLE,
            search: SearchOptions::default(),
            decomposition: DecompositionOptions::default(),
            evaluator: EvaluatorOptions::default(),
        }
    }
}

/// Builder for [`MadsOptions`].
#[derive(Debug, Clone, Default)]
pub struct MadsOptionsBuilder {
    seed: Option<u64>,
    max_iterations: Option<usize>,
    max_time: Option<Duration>,
    stop_if_feasible: Option<bool>,
    initial_frame_size: Option<Vec<f64>>,
    min_mesh_size: Option<Vec<f64>>,
    min_frame_size: Option<Vec<f64>>,
    anisotropy: Option<Option<f64>>,
    poll_strategy: Option<PollStrategy>,
    secondary_poll: Option<bool>,
    h_tolerance: Option<f64>,
    max_infeasible: Option<usize>,
    search: Option<SearchOptions>,
    decomposition: Option<DecompositionOptions>,
    evaluator: Option<EvaluatorOptions>,
}

impl MadsOptionsBuilder {
    pub fn seed(mut self, value: u64) -> Self {
        self.seed = Some(value);
        self
    }

    pub fn max_iterations(mut self, value: usize) -> Self {
        self.max_iterations = Some(value);
        self
    }

    pub fn max_time(mut self, value: Duration) -> Self {
        self.max_time = Some(value);
        self
    }

    /// Stops as soon as a feasible point is known.
    pub fn stop_if_feasible(mut self, value: bool) -> Self {
        self.stop_if_feasible = Some(value);
        self
    }

    pub fn initial_frame_size(mut self, value: Vec<f64>) -> Self {
        self.initial_frame_size = Some(value);
        self
    }

    pub fn min_mesh_size(mut self, value: Vec<f64>) -> Self {
        self.min_mesh_size = Some(value);
        self
    }

    pub fn min_frame_size(mut self, value: Vec<f64>) -> Self {
        self.min_frame_size = Some(value);
        self
    }

    /// Anisotropy factor of the mesh, `None` for an isotropic mesh.
    pub fn anisotropy(mut self, value: Option<f64>) -> Self {
        self.anisotropy = Some(value);
        self
    }

    pub fn poll_strategy(mut self, value: PollStrategy) -> Self {
        self.poll_strategy = Some(value);
        self
    }

    pub fn secondary_poll(mut self, value: bool) -> Self {
        self.secondary_poll = Some(value);
        self
    }

    pub fn h_tolerance(mut self, value: f64) -> Self {
        self.h_tolerance = Some(value);
        self
    }

    pub fn max_infeasible(mut self, value: usize) -> Self {
        self.max_infeasible = Some(value);
        self
    }

    pub fn search(mut self, value: SearchOptions) -> Self {
        self.search = Some(value);
        self
    }

    pub fn decomposition(mut self, value: DecompositionOptions) -> Self {
        self.decomposition = Some(value);
        self
    }

    pub fn evaluator(mut self, value: EvaluatorOptions) -> Self {
        self.evaluator = Some(value);
        self
    }

    /// # Errors
    ///
    /// Returns [`MadsError::Configuration`] when a value is out of range.
    pub fn build(self) -> Result<MadsOptions> {
        let defaults = MadsOptions::default();
        let options = MadsOptions {
            seed: self.seed.unwrap_or(defaults.seed),
            max_iterations: self.max_iterations,
            max_time: self.max_time,
            stop_if_feasible: self.stop_if_feasible.unwrap_or(defaults.stop_if_feasible),
            initial_frame_size: self.initial_frame_size,
            min_mesh_size: self.min_mesh_size,
            min_frame_size: self.min_frame_size,
            anisotropy: self.anisotropy.unwrap_or(defaults.anisotropy),
            poll_strategy: self.poll_strategy.unwrap_or(defaults.poll_strategy),
            secondary_poll: self.secondary_poll.unwrap_or(defaults.secondary_poll),
            h_tolerance: self.h_tolerance.unwrap_or(defaults.h_tolerance),
            max_infeasible: self.max_infeasible.unwrap_or(defaults.max_infeasible),
            search: self.search.unwrap_or(defaults.search),
            decomposition: self.decomposition.unwrap_or(defaults.decomposition),
            evaluator: self.evaluator.unwrap_or(defaults.evaluator),
        };

        check_sizes("initial_frame_size", &options.initial_frame_size)?;
        check_sizes("min_mesh_size", &options.min_mesh_size)?;
        check_sizes("min_frame_size", &options.min_frame_size)?;
        if let Some(a) = options.anisotropy {
            if !(a > 0.0 && a < 1.0) {
                return Err(invalid("anisotropy factor must lie in (0, 1)"));
            }
        }
        if !(options.h_tolerance >= 0.0) {
            return Err(invalid("h_tolerance must be non-negative"));
        }
        if options.max_infeasible == 0 {
            return Err(invalid("max_infeasible must be positive"));
        }
        if options.search.speculative_max_points == 0 {
            return Err(invalid("speculative_max_points must be positive"));
        }
        if let Some(nm) = &options.search.nelder_mead {
            if !(nm.delta_e > 1.0)
                || !(nm.delta_oc > 0.0 && nm.delta_oc <= 1.0)
                || !(nm.delta_ic < 0.0)
                || !(nm.include_factor > 0.0)
            {
                return Err(invalid("invalid Nelder-Mead coefficients"));
            }
        }
        let d = &options.decomposition;
        if d.subproblem_dimension == 0 || d.subproblems == Some(0) {
            return Err(invalid("subproblems must have at least one variable"));
        }
        if !(d.coverage_percent > 0.0 && d.coverage_percent <= 100.0) {
            return Err(invalid("coverage_percent must lie in (0, 100]"));
        }
        Ok(options)
    }
}
