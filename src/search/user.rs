//! A search method backed by a user callback.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use crate::algo::{FrameContext, TrialPointGenerator};
use crate::eval::{EvalPoint, StepType};
use crate::point::Point;
use crate::rng::RandomNumberGenerator;
use crate::stop::{Phase, SearchStop, StopReason};

type Callback = Box<dyn FnMut(&FrameContext<'_>) -> Vec<Point> + Send>;

/// Wraps a closure proposing raw points around the frame; the search step
/// projects them on the mesh. A panicking closure proposes nothing and sets
/// `GENERATOR_FAILED`.
///
/// ## Example
///
/// ```rust
/// use mads::point::Point;
/// use mads::search::{Search, SearchTieBreak, UserSearch};
///
/// let mut search = Search::new(true, SearchTieBreak::PriorityOrder);
/// search.push(Box::new(UserSearch::new("origin", |ctx| {
///     vec![Point::new(vec![0.0; ctx.dimension()])]
/// })));
/// assert_eq!(search.method_names(), vec!["origin"]);
/// ```
pub struct UserSearch {
    name: &'static str,
    callback: Callback,
    stop: StopReason,
}

impl fmt::Debug for UserSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSearch")
            .field("name", &self.name)
            .field("stop", &self.stop)
            .finish()
    }
}

impl UserSearch {
    pub fn new<F>(name: &'static str, callback: F) -> Self
    where
        F: FnMut(&FrameContext<'_>) -> Vec<Point> + Send + 'static,
    {
        Self {
            name,
            callback: Box::new(callback),
            stop: StopReason::started(Phase::Search),
        }
    }
}

impl TrialPointGenerator for UserSearch {
    fn name(&self) -> &'static str {
        self.name
    }

    fn generate(
        &mut self,
        ctx: &FrameContext<'_>,
        _rng: &mut RandomNumberGenerator,
    ) -> Vec<EvalPoint> {
        let center = ctx.center.point();
        let callback = &mut self.callback;
        let Ok(proposed) = panic::catch_unwind(AssertUnwindSafe(|| callback(ctx))) else {
            warn!(method = self.name, "search callback panicked");
            self.stop.set(SearchStop::GeneratorFailed);
            return Vec::new();
        };
        let points: Vec<EvalPoint> = proposed
            .into_iter()
            .map(|x| EvalPoint::new(x, StepType::UserSearch).with_point_from(center))
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
