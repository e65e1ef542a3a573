//! # mads
//!
//! Mesh Adaptive Direct Search for blackbox optimization: minimize `f(x)`
//! over a box, subject to constraints `c_j(x) <= 0`, when `f` and `c_j` are
//! only available through an expensive, possibly failing evaluator.
//!
//! The crate is organized bottom-up:
//!
//! - [`point`] and [`mesh`]: points, directions, bounds and the granular
//!   mesh that every trial point lies on;
//! - [`eval`]: evaluated points, success computation and the progressive
//!   [`eval::Barrier`];
//! - [`caching`]: the concurrent evaluation cache;
//! - [`evaluator`]: the [`evaluator::Evaluator`] seam and the concurrent
//!   [`evaluator::EvaluatorControl`];
//! - [`poll`] and [`search`]: trial point generators;
//! - [`algo`]: iterations, the [`algo::Mads`] loop and the space
//!   decomposition variants;
//! - [`stop`]: the stop reason hierarchy.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use mads::algo::{AlgorithmKind, Runnable};
//! use mads::eval::BbOutput;
//! use mads::evaluator::{EvaluationError, FnEvaluator};
//! use mads::options::{MadsOptions, Problem};
//! use mads::point::Point;
//!
//! let problem = Problem::builder()
//!     .x0(Point::new(vec![1.0, 1.0]))
//!     .bounds(vec![-3.0; 2], vec![3.0; 2])
//!     .build()
//!     .unwrap();
//! let options = MadsOptions::builder().max_iterations(20).build().unwrap();
//! let evaluator = FnEvaluator::new(|x: &Point| {
//!     Ok::<_, EvaluationError>(BbOutput::unconstrained(x[0] * x[0] + x[1] * x[1]))
//! });
//!
//! let mut algorithm = AlgorithmKind::Mads
//!     .build(problem, options, Arc::new(evaluator))
//!     .unwrap();
//! let result = algorithm.run().unwrap();
//! assert!(result.best().is_some());
//! ```

pub mod algo;
pub mod caching;
pub mod error;
pub mod eval;
pub mod evaluator;
pub mod mesh;
pub mod options;
pub mod point;
pub mod poll;
pub mod rng;
pub mod search;
pub mod stop;

// Re-export commonly used types for convenience
pub use algo::{Algorithm, AlgorithmKind, Mads, PsdMads, RunResult, Runnable, SsdMads};
pub use error::{MadsError, OptionExt, Result, ResultExt};
pub use eval::{BbOutput, EvalPoint, EvalStatus, SuccessType};
pub use evaluator::{EvaluationError, Evaluator, EvaluatorControl, FnEvaluator};
pub use options::{MadsOptions, Problem};
pub use point::Point;
pub use stop::{StopHandle, StopReason};
