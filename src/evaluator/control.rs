//! # EvaluatorControl
//!
//! The concurrent evaluation pipeline. A call to [`EvaluatorControl::run`]
//! takes a batch of trial points and
//!
//! 1. deduplicates it, then consults the cache: completed records are reused,
//!    keys in flight elsewhere are attached to, the rest are reserved;
//! 2. orders the reserved points by the requested [`EvalSortType`];
//! 3. lets the worker pool pop blocks of points from a shared priority queue,
//!    reserving evaluation budget before every dispatch;
//! 4. returns every point in submission order.
//!
//! Budgets are counted atomically before dispatch, so the evaluator is never
//! called past a limit. Once a global limit is reached, or a stop is
//! requested, workers stop popping and the calls already running finish
//! normally. In opportunistic mode, the first full success against the
//! caller's barrier halts the batch; the points left in the queue stay
//! `NotEvaluated` and their cache reservations are released.

use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use thread_local::ThreadLocal;
use tracing::{debug, warn};

use super::queue::{EvalQueuePoint, EvalSortType, Priority};
use super::{EvaluationError, Evaluator};
use crate::caching::{lock, Cache, CacheKey, PendingEval, Reservation, ReservedSlot};
use crate::error::{MadsError, Result, ResultExt};
use crate::eval::{
    compute_success_type, Barrier, BbOutput, Constraints, EvalPoint, EvalType, StepType,
    SuccessType,
};
use crate::options::EvaluatorOptions;
use crate::point::{Direction, Point};
use crate::rng::RandomNumberGenerator;
use crate::stop::{EvalGlobalStop, EvalMainThreadStop, Phase, StopHandle, StopReason};

/// A blackbox budget local to one run, such as a decomposition subproblem.
#[derive(Debug)]
pub struct LapBudget {
    limit: usize,
    used: AtomicUsize,
    cause: EvalMainThreadStop,
}

impl LapBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
            cause: EvalMainThreadStop::LapMaxBbEvalReached,
        }
    }

    /// A lap budget reported as `SUBPROBLEM_MAX_BB_EVAL_REACHED`.
    pub fn subproblem(limit: usize) -> Self {
        Self {
            cause: EvalMainThreadStop::SubproblemMaxBbEvalReached,
            ..Self::new(limit)
        }
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used() >= self.limit
    }

    /// The cause recorded once the budget runs out.
    pub fn cause(&self) -> EvalMainThreadStop {
        self.cause
    }
}

/// A request to evaluate points.
pub struct Batch<'a> {
    points: Vec<EvalPoint>,
    eval_type: EvalType,
    opportunistic: bool,
    barrier: Option<&'a Barrier>,
    sort: Option<EvalSortType>,
    last_direction: Option<&'a Direction>,
    lap: Option<&'a LapBudget>,
}

impl<'a> Batch<'a> {
    pub fn new(points: Vec<EvalPoint>) -> Self {
        Self {
            points,
            eval_type: EvalType::Blackbox,
            opportunistic: false,
            barrier: None,
            sort: None,
            last_direction: None,
            lap: None,
        }
    }

    pub fn eval_type(mut self, eval_type: EvalType) -> Self {
        self.eval_type = eval_type;
        self
    }

    /// Halts the batch at the first full success against `barrier`.
    pub fn opportunistic(mut self, opportunistic: bool) -> Self {
        self.opportunistic = opportunistic;
        self
    }

    /// Incumbents the results are classified against.
    pub fn barrier(mut self, barrier: &'a Barrier) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Overrides the ordering configured on the control.
    pub fn sort(mut self, sort: EvalSortType) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn last_direction(mut self, direction: Option<&'a Direction>) -> Self {
        self.last_direction = direction;
        self
    }

    pub fn lap(mut self, lap: Option<&'a LapBudget>) -> Self {
        self.lap = lap;
        self
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// The submitted points, in submission order.
    pub points: Vec<EvalPoint>,
    /// Best success against the batch's barrier.
    pub success: SuccessType,
    /// Why the batch ended.
    pub stop: StopReason,
    /// Evaluator calls made for this batch.
    pub new_evaluations: usize,
}

impl BatchResult {
    /// The evaluated point with the best success, first one on ties.
    pub fn best(&self, barrier: &Barrier) -> Option<&EvalPoint> {
        let mut best: Option<(&EvalPoint, SuccessType)> = None;
        for p in &self.points {
            let s = compute_success_type(p, barrier);
            if best.map_or(true, |(_, b)| s > b) {
                best = Some((p, s));
            }
        }
        best.map(|(p, _)| p)
    }
}

struct RunShared<'a> {
    heap: Mutex<BinaryHeap<EvalQueuePoint>>,
    results: Mutex<Vec<Option<EvalPoint>>>,
    halt: AtomicBool,
    stop: Mutex<StopReason>,
    dispatched: AtomicUsize,
    eval_type: EvalType,
    opportunistic: bool,
    barrier: Option<&'a Barrier>,
    lap: Option<&'a LapBudget>,
    evaluator: &'a dyn Evaluator,
}

/// Dispatches evaluations to a pool of workers and owns the shared cache and
/// the global budgets.
pub struct EvaluatorControl {
    evaluator: Arc<dyn Evaluator>,
    surrogate: Option<Arc<dyn Evaluator>>,
    constraints: Constraints,
    options: EvaluatorOptions,
    cache: Arc<Cache>,
    pool: rayon::ThreadPool,
    bb_evals: AtomicUsize,
    evals: AtomicUsize,
    block_evals: AtomicUsize,
    model_evals: AtomicUsize,
    surrogate_evals: AtomicUsize,
    next_tag: AtomicU64,
    next_generation: AtomicU64,
    per_worker: ThreadLocal<AtomicUsize>,
    global_stop: Mutex<StopReason>,
    stop_handle: StopHandle,
}

impl fmt::Debug for EvaluatorControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorControl")
            .field("options", &self.options)
            .field("bb_evals", &self.bb_evals())
            .field("evals", &self.evals())
            .field("cache_size", &self.cache.len())
            .field("global_stop", &self.global_stop_reason())
            .finish()
    }
}

impl EvaluatorControl {
    /// Creates a control with its own cache and worker pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot be built.
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        constraints: Constraints,
        options: EvaluatorOptions,
    ) -> Result<Self> {
        if options.get_workers() == 0 || options.get_block_size() == 0 {
            return Err(MadsError::Configuration(
                "worker count and block size must be positive".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.get_workers())
            .thread_name(|i| format!("mads-eval-{}", i))
            .build()
            .context("Failed to build the evaluation worker pool")?;

        Ok(Self {
            evaluator,
            surrogate: None,
            constraints,
            options,
            cache: Arc::new(Cache::new()),
            pool,
            bb_evals: AtomicUsize::new(0),
            evals: AtomicUsize::new(0),
            block_evals: AtomicUsize::new(0),
            model_evals: AtomicUsize::new(0),
            surrogate_evals: AtomicUsize::new(0),
            next_tag: AtomicU64::new(1),
            next_generation: AtomicU64::new(0),
            per_worker: ThreadLocal::new(),
            global_stop: Mutex::new(StopReason::started(Phase::EvalGlobal)),
            stop_handle: StopHandle::new(),
        })
    }

    /// Shares an existing cache, for example one seeded from an earlier run.
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = cache;
        self
    }

    /// Static surrogate used by [`EvalSortType::Surrogate`].
    pub fn with_surrogate(mut self, surrogate: Arc<dyn Evaluator>) -> Self {
        self.surrogate = Some(surrogate);
        self
    }

    pub fn with_stop_handle(mut self, handle: StopHandle) -> Self {
        self.stop_handle = handle;
        self
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn options(&self) -> &EvaluatorOptions {
        &self.options
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    /// Blackbox calls so far.
    pub fn bb_evals(&self) -> usize {
        self.bb_evals.load(Ordering::SeqCst)
    }

    /// Blackbox calls plus blackbox cache hits.
    pub fn evals(&self) -> usize {
        self.evals.load(Ordering::SeqCst)
    }

    pub fn block_evals(&self) -> usize {
        self.block_evals.load(Ordering::SeqCst)
    }

    pub fn model_evals(&self) -> usize {
        self.model_evals.load(Ordering::SeqCst)
    }

    pub fn surrogate_evals(&self) -> usize {
        self.surrogate_evals.load(Ordering::SeqCst)
    }

    /// Points evaluated by each worker thread that took part so far.
    pub fn worker_evaluations(&self) -> Vec<usize> {
        self.per_worker
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect()
    }

    pub fn global_stop_reason(&self) -> StopReason {
        *lock(&self.global_stop)
    }

    /// Clears the global stop reason and every counter, for a new run.
    pub fn reset(&self) {
        lock(&self.global_stop).reset();
        for counter in [
            &self.bb_evals,
            &self.evals,
            &self.block_evals,
            &self.model_evals,
            &self.surrogate_evals,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    fn set_global_stop(&self, cause: EvalGlobalStop) {
        if lock(&self.global_stop).set(cause) {
            debug!(reason = cause.info().name, "global evaluation stop");
        }
    }

    /// Records the global limits that are reached.
    fn refresh_global_stop(&self) {
        let reached = |counter: &AtomicUsize, limit: Option<usize>| {
            limit.map_or(false, |l| counter.load(Ordering::SeqCst) >= l)
        };
        if reached(&self.bb_evals, self.options.get_max_bb_eval()) {
            self.set_global_stop(EvalGlobalStop::MaxBbEvalReached);
        }
        if reached(&self.evals, self.options.get_max_eval()) {
            self.set_global_stop(EvalGlobalStop::MaxEvalReached);
        }
        if reached(&self.block_evals, self.options.get_max_block_eval()) {
            self.set_global_stop(EvalGlobalStop::MaxBlockEvalReached);
        }
    }

    /// Returns `true` when no blackbox dispatch may happen any more.
    pub fn dispatch_blocked(&self) -> bool {
        self.stop_handle.is_requested() || self.global_stop_reason().terminates()
    }

    /// Evaluates a batch with the blackbox.
    pub fn run(&self, batch: Batch<'_>, rng: &mut RandomNumberGenerator) -> BatchResult {
        let evaluator = Arc::clone(&self.evaluator);
        self.execute(batch, evaluator.as_ref(), rng)
    }

    /// Evaluates a batch with another evaluator, for example a fitted model.
    pub fn run_with(
        &self,
        batch: Batch<'_>,
        evaluator: &dyn Evaluator,
        rng: &mut RandomNumberGenerator,
    ) -> BatchResult {
        self.execute(batch, evaluator, rng)
    }

    fn execute(
        &self,
        batch: Batch<'_>,
        evaluator: &dyn Evaluator,
        rng: &mut RandomNumberGenerator,
    ) -> BatchResult {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let eval_type = batch.eval_type;
        let mut stop = StopReason::started(Phase::EvalMainThread);

        let originals: Vec<EvalPoint> = batch
            .points
            .into_iter()
            .map(|p| p.with_eval_type(eval_type))
            .collect();
        if originals.is_empty() {
            stop.set(EvalMainThreadStop::EmptyListOfPoints);
            return BatchResult {
                points: originals,
                success: SuccessType::NotEvaluated,
                stop,
                new_evaluations: 0,
            };
        }

        // Deduplicate within the batch.
        let mut seen = HashMap::new();
        let mut index_of = Vec::with_capacity(originals.len());
        let mut unique: Vec<EvalPoint> = Vec::new();
        for p in &originals {
            let next = unique.len();
            let idx = *seen.entry(p.point().cache_key()).or_insert(next);
            if idx == next {
                unique.push(p.clone());
            }
            index_of.push(idx);
        }

        let mut results: Vec<Option<EvalPoint>> = vec![None; unique.len()];
        let mut pending: Vec<(usize, EvalPoint, PendingEval)> = Vec::new();
        let mut queued: Vec<(usize, EvalPoint, Option<ReservedSlot>)> = Vec::new();
        let cached = eval_type != EvalType::Model && self.options.use_cache();

        for (u, mut p) in unique.into_iter().enumerate() {
            if !cached {
                queued.push((u, p, None));
                continue;
            }
            match self.cache.reserve(p.point(), eval_type) {
                Reservation::Hit(done) => {
                    p.adopt(&done);
                    if eval_type == EvalType::Blackbox {
                        // Hits count toward max_eval unchecked; the overshoot is
                        // caught by the next refresh of the global stop.
                        self.evals.fetch_add(1, Ordering::SeqCst);
                    }
                    results[u] = Some(p);
                }
                Reservation::InFlight(wait) => pending.push((u, p, wait)),
                Reservation::Reserved(slot) => queued.push((u, p, Some(slot))),
            }
        }

        let sort = batch.sort.unwrap_or(self.options.get_sort());
        let surrogate_keys = if sort == EvalSortType::Surrogate {
            self.surrogate_priorities(queued.iter().map(|(_, p, _)| p.point()))
        } else {
            Vec::new()
        };
        let heap: BinaryHeap<EvalQueuePoint> = queued
            .into_iter()
            .enumerate()
            .map(|(k, (u, p, slot))| {
                let priority = match sort {
                    EvalSortType::Submission => Priority::default(),
                    EvalSortType::LastSuccessDirection => {
                        Priority::from_direction(&p, batch.last_direction)
                    }
                    EvalSortType::Random => Priority::random(rng),
                    EvalSortType::Surrogate => surrogate_keys.get(k).copied().unwrap_or_default(),
                };
                EvalQueuePoint::new(p, priority, u, generation, slot)
            })
            .collect();

        let to_dispatch = heap.len();
        debug!(
            generation,
            submitted = originals.len(),
            cached = results.iter().filter(|r| r.is_some()).count(),
            attached = pending.len(),
            to_dispatch,
            "evaluating batch"
        );

        let shared = RunShared {
            heap: Mutex::new(heap),
            results: Mutex::new(results),
            halt: AtomicBool::new(false),
            stop: Mutex::new(stop),
            dispatched: AtomicUsize::new(0),
            eval_type,
            opportunistic: batch.opportunistic && batch.barrier.is_some(),
            barrier: batch.barrier,
            lap: batch.lap,
            evaluator,
        };

        if to_dispatch > 0 {
            let block = self.options.get_block_size();
            let workers = self.options.get_workers().min(to_dispatch.div_ceil(block)).max(1);
            self.pool.scope(|s| {
                for _ in 0..workers {
                    s.spawn(|_| self.worker_loop(&shared));
                }
            });
        }

        // Whatever is left in the queue is released here.
        let leftover = std::mem::take(&mut *lock(&shared.heap)).len();
        let mut results = std::mem::take(&mut *lock(&shared.results));
        for (u, mut p, wait) in pending {
            if let Some(done) = wait.wait() {
                p.adopt(&done);
                results[u] = Some(p);
            }
        }

        let points: Vec<EvalPoint> = originals
            .into_iter()
            .zip(&index_of)
            .map(|(mut p, &u)| {
                if let Some(done) = &results[u] {
                    p.adopt(done);
                }
                p
            })
            .collect();

        let success = match batch.barrier {
            Some(barrier) => points
                .iter()
                .map(|p| compute_success_type(p, barrier))
                .max()
                .unwrap_or_default(),
            None => SuccessType::NotEvaluated,
        };

        let mut stop = *lock(&shared.stop);
        if let Some(lap) = batch.lap {
            if lap.is_exhausted() {
                stop.set(lap.cause);
            }
        }
        if leftover == 0 && points.iter().all(|p| p.status().is_done()) {
            stop.set(EvalMainThreadStop::AllPointsEvaluated);
        }
        self.refresh_global_stop();

        BatchResult {
            points,
            success,
            stop,
            new_evaluations: shared.dispatched.load(Ordering::SeqCst),
        }
    }

    fn worker_loop(&self, shared: &RunShared<'_>) {
        let block_size = self.options.get_block_size();
        loop {
            if shared.halt.load(Ordering::SeqCst) {
                break;
            }
            if self.stop_handle.is_requested()
                || (shared.eval_type == EvalType::Blackbox && self.dispatch_blocked())
            {
                shared.halt.store(true, Ordering::SeqCst);
                break;
            }

            let mut block: Vec<EvalQueuePoint> = {
                let mut heap = lock(&shared.heap);
                std::iter::from_fn(|| heap.pop()).take(block_size).collect()
            };
            if block.is_empty() {
                break;
            }

            let granted = self.reserve_budget(block.len(), shared);
            if granted < block.len() {
                let rest = block.split_off(granted);
                lock(&shared.heap).extend(rest);
                shared.halt.store(true, Ordering::SeqCst);
            }
            if block.is_empty() {
                break;
            }

            self.evaluate_block(&mut block, shared);

            let mut results = lock(&shared.results);
            for mut entry in block {
                let success = shared
                    .barrier
                    .map(|b| compute_success_type(&entry.point, b))
                    .unwrap_or_default();
                if let Some(slot) = entry.slot.take() {
                    slot.complete(&entry.point);
                }
                if shared.opportunistic && success == SuccessType::FullSuccess {
                    lock(&shared.stop).set(EvalMainThreadStop::OpportunisticSuccess);
                    shared.halt.store(true, Ordering::SeqCst);
                }
                results[entry.seq] = Some(entry.point);
            }
            drop(results);

            if shared.eval_type == EvalType::Blackbox {
                self.refresh_global_stop();
            }
        }
    }

    fn evaluate_block(&self, block: &mut [EvalQueuePoint], shared: &RunShared<'_>) {
        for entry in block.iter_mut() {
            entry.point.set_in_progress();
            entry
                .point
                .set_tag(self.next_tag.fetch_add(1, Ordering::SeqCst));
        }
        let xs: Vec<Point> = block.iter().map(|e| e.point.point().clone()).collect();

        let outcomes = panic::catch_unwind(AssertUnwindSafe(|| {
            shared.evaluator.evaluate_block(&xs, shared.eval_type)
        }));
        let outcomes: Vec<std::result::Result<BbOutput, EvaluationError>> = match outcomes {
            Ok(out) if out.len() == xs.len() => out,
            Ok(out) => {
                warn!(expected = xs.len(), got = out.len(), "evaluator returned a wrong number of outputs");
                vec![Err(EvaluationError::Crashed("wrong number of outputs".to_string())); xs.len()]
            }
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "evaluator panicked".to_string());
                warn!(message = %msg, "evaluator panicked");
                vec![Err(EvaluationError::Crashed(msg)); xs.len()]
            }
        };

        shared.dispatched.fetch_add(xs.len(), Ordering::SeqCst);
        self.per_worker
            .get_or(|| AtomicUsize::new(0))
            .fetch_add(xs.len(), Ordering::Relaxed);

        for (entry, outcome) in block.iter_mut().zip(outcomes) {
            entry.point.record(outcome, &self.constraints);
        }
    }

    /// Reserves budget for up to `want` evaluations and returns how many are
    /// granted. Nothing is reserved when the answer is zero.
    fn reserve_budget(&self, want: usize, shared: &RunShared<'_>) -> usize {
        match shared.eval_type {
            EvalType::Model => {
                let granted = try_take(&self.model_evals, self.options.get_max_model_eval(), want);
                if granted < want {
                    lock(&shared.stop).set(EvalMainThreadStop::MaxModelEvalReached);
                }
                granted
            }
            EvalType::Surrogate => {
                let granted =
                    try_take(&self.surrogate_evals, self.options.get_max_surrogate_eval(), want);
                if granted < want {
                    self.set_global_stop(EvalGlobalStop::MaxSurrogateEvalReached);
                }
                granted
            }
            EvalType::Blackbox => {
                if try_take(&self.block_evals, self.options.get_max_block_eval(), 1) == 0 {
                    self.set_global_stop(EvalGlobalStop::MaxBlockEvalReached);
                    return 0;
                }
                let bb = try_take(&self.bb_evals, self.options.get_max_bb_eval(), want);
                let total = try_take(&self.evals, self.options.get_max_eval(), bb);
                give_back(&self.bb_evals, bb - total);
                let lap = match shared.lap {
                    Some(lap) => try_take(&lap.used, Some(lap.limit), total),
                    None => total,
                };
                give_back(&self.bb_evals, total - lap);
                give_back(&self.evals, total - lap);
                if lap == 0 {
                    give_back(&self.block_evals, 1);
                    self.refresh_global_stop();
                    if let Some(l) = shared.lap {
                        lock(&shared.stop).set(l.cause);
                    }
                }
                lap
            }
        }
    }

    /// Surrogate `(h, f)` keys for dispatch ordering. Surrogate results are
    /// cached under [`EvalType::Surrogate`].
    fn surrogate_priorities<'p, I>(&self, points: I) -> Vec<Priority>
    where
        I: Iterator<Item = &'p Point>,
    {
        let Some(surrogate) = &self.surrogate else {
            return points.map(|_| Priority::default()).collect();
        };
        points
            .map(|x| {
                let evaluated = match self.cache.reserve(x, EvalType::Surrogate) {
                    Reservation::Hit(p) => Some(p),
                    Reservation::InFlight(wait) => wait.wait(),
                    Reservation::Reserved(slot) => {
                        if try_take(&self.surrogate_evals, self.options.get_max_surrogate_eval(), 1) == 0 {
                            self.set_global_stop(EvalGlobalStop::MaxSurrogateEvalReached);
                            slot.abandon();
                            None
                        } else {
                            let mut p = EvalPoint::new(x.clone(), StepType::Poll)
                                .with_eval_type(EvalType::Surrogate);
                            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                                surrogate.evaluate(x, EvalType::Surrogate)
                            }))
                            .unwrap_or_else(|_| {
                                Err(EvaluationError::Crashed("surrogate panicked".to_string()))
                            });
                            p.record(outcome, &self.constraints);
                            slot.complete(&p);
                            Some(p)
                        }
                    }
                };
                Priority::from_surrogate(evaluated.as_ref())
            })
            .collect()
    }
}

/// Atomically takes up to `want` units below `limit`.
fn try_take(counter: &AtomicUsize, limit: Option<usize>, want: usize) -> usize {
    let Some(limit) = limit else {
        counter.fetch_add(want, Ordering::SeqCst);
        return want;
    };
    let mut current = counter.load(Ordering::SeqCst);
    loop {
        let granted = want.min(limit.saturating_sub(current));
        if granted == 0 {
            return 0;
        }
        match counter.compare_exchange(
            current,
            current + granted,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => return granted,
            Err(actual) => current = actual,
        }
    }
}

fn give_back(counter: &AtomicUsize, amount: usize) {
    if amount > 0 {
        counter.fetch_sub(amount, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalStatus;
    use crate::evaluator::FnEvaluator;

    fn counting(calls: Arc<AtomicUsize>) -> Arc<dyn Evaluator> {
        Arc::new(FnEvaluator::new(move |x: &Point| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(BbOutput::unconstrained(x[0]))
        }))
    }

    fn batch_of(xs: &[f64]) -> Vec<EvalPoint> {
        xs.iter()
            .map(|&x| EvalPoint::new(Point::new(vec![x]), StepType::Poll))
            .collect()
    }

    fn control(eval: Arc<dyn Evaluator>, options: EvaluatorOptions) -> EvaluatorControl {
        EvaluatorControl::new(eval, Constraints::default(), options).unwrap()
    }

    #[test]
    fn test_results_in_submission_order_with_duplicates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let evc = control(counting(calls.clone()), EvaluatorOptions::builder().workers(3).build().unwrap());
        let mut rng = RandomNumberGenerator::from_seed(1);

        let res = evc.run(Batch::new(batch_of(&[3.0, 1.0, 3.0, 2.0])), &mut rng);
        let fs: Vec<Option<f64>> = res.points.iter().map(EvalPoint::f).collect();
        assert_eq!(fs, vec![Some(3.0), Some(1.0), Some(3.0), Some(2.0)]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(res.stop.is(EvalMainThreadStop::AllPointsEvaluated));
    }

    #[test]
    fn test_cache_reuse_does_not_call_evaluator() {
        let calls = Arc::new(AtomicUsize::new(0));
        let evc = control(counting(calls.clone()), EvaluatorOptions::default());
        let mut rng = RandomNumberGenerator::from_seed(1);

        evc.run(Batch::new(batch_of(&[1.0, 2.0])), &mut rng);
        let again = evc.run(Batch::new(batch_of(&[2.0, 1.0])), &mut rng);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(again.new_evaluations, 0);
        assert_eq!(again.points[0].f(), Some(2.0));
        assert_eq!(evc.evals(), 4);
        assert_eq!(evc.bb_evals(), 2);
    }

    #[test]
    fn test_opportunistic_halt_leaves_points_unevaluated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let evc = control(counting(calls.clone()), EvaluatorOptions::builder().workers(1).build().unwrap());
        let mut rng = RandomNumberGenerator::from_seed(1);
        let barrier = Barrier::new(0.0, 10);

        let res = evc.run(
            Batch::new(batch_of(&[5.0, 4.0, 3.0])).opportunistic(true).barrier(&barrier),
            &mut rng,
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(res.success, SuccessType::FullSuccess);
        assert!(res.stop.is(EvalMainThreadStop::OpportunisticSuccess));
        assert!(!res.points[2].status().is_done());
        // Released reservations can be evaluated later.
        assert_eq!(evc.cache().in_flight(), 0);
        evc.run(Batch::new(batch_of(&[3.0])), &mut rng);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_budget_is_never_exceeded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let options = EvaluatorOptions::builder()
            .workers(4)
            .max_bb_eval(5)
            .build()
            .unwrap();
        let evc = control(counting(calls.clone()), options);
        let mut rng = RandomNumberGenerator::from_seed(1);

        let xs: Vec<f64> = (0..20).map(f64::from).collect();
        let res = evc.run(Batch::new(batch_of(&xs)), &mut rng);

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(res.new_evaluations, 5);
        assert!(evc.global_stop_reason().is(EvalGlobalStop::MaxBbEvalReached));
        assert!(evc.dispatch_blocked());
        assert_eq!(res.points.iter().filter(|p| p.status().is_done()).count(), 5);
    }

    #[test]
    fn test_lap_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let evc = control(counting(calls.clone()), EvaluatorOptions::default());
        let mut rng = RandomNumberGenerator::from_seed(1);
        let lap = LapBudget::subproblem(2);

        let res = evc.run(Batch::new(batch_of(&[1.0, 2.0, 3.0])).lap(Some(&lap)), &mut rng);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(res.stop.is(EvalMainThreadStop::SubproblemMaxBbEvalReached));
        assert!(!evc.global_stop_reason().terminates());
    }

    #[test]
    fn test_failures_and_panics_are_per_point() {
        let eval: Arc<dyn Evaluator> = Arc::new(FnEvaluator::new(|x: &Point| {
            if x[0] == 1.0 {
                panic!("boom");
            }
            if x[0] == 2.0 {
                return Err(EvaluationError::Failed("no".to_string()));
            }
            Ok(BbOutput::unconstrained(0.0))
        }));
        let evc = control(eval, EvaluatorOptions::builder().workers(2).build().unwrap());
        let mut rng = RandomNumberGenerator::from_seed(1);

        let res = evc.run(Batch::new(batch_of(&[1.0, 2.0, 3.0])), &mut rng);
        let statuses: Vec<EvalStatus> = res.points.iter().map(EvalPoint::status).collect();
        assert_eq!(
            statuses,
            vec![EvalStatus::EvalError, EvalStatus::EvalFailed, EvalStatus::EvalOk]
        );
    }

    #[test]
    fn test_model_evaluations_bypass_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let options = EvaluatorOptions::builder().max_model_eval(3).build().unwrap();
        let evc = control(counting(Arc::new(AtomicUsize::new(0))), options);
        let model = counting(calls.clone());
        let mut rng = RandomNumberGenerator::from_seed(1);

        let batch = Batch::new(batch_of(&[1.0, 2.0])).eval_type(EvalType::Model);
        evc.run_with(batch, model.as_ref(), &mut rng);
        let batch = Batch::new(batch_of(&[1.0, 2.0])).eval_type(EvalType::Model);
        let res = evc.run_with(batch, model.as_ref(), &mut rng);

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(res.stop.is(EvalMainThreadStop::MaxModelEvalReached));
        assert!(evc.cache().is_empty());
        assert_eq!(evc.bb_evals(), 0);
    }

    #[test]
    fn test_surrogate_ordering() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();
        let bb: Arc<dyn Evaluator> = Arc::new(FnEvaluator::new(move |x: &Point| {
            lock(&seen).push(x[0]);
            Ok(BbOutput::unconstrained(x[0]))
        }));
        let surrogate: Arc<dyn Evaluator> =
            Arc::new(FnEvaluator::new(|x: &Point| Ok(BbOutput::unconstrained(-x[0]))));
        let options = EvaluatorOptions::builder()
            .workers(1)
            .sort(EvalSortType::Surrogate)
            .build()
            .unwrap();
        let evc = control(bb, options).with_surrogate(surrogate);
        let mut rng = RandomNumberGenerator::from_seed(1);

        evc.run(Batch::new(batch_of(&[1.0, 3.0, 2.0])), &mut rng);
        assert_eq!(*lock(&order), vec![3.0, 2.0, 1.0]);
        assert_eq!(evc.surrogate_evals(), 3);
        assert_eq!(evc.worker_evaluations().iter().sum::<usize>(), 3);
    }

    #[test]
    fn test_surrogate_budget_falls_back_to_neutral_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let surrogate: Arc<dyn Evaluator> =
            Arc::new(FnEvaluator::new(|x: &Point| Ok(BbOutput::unconstrained(-x[0]))));
        let options = EvaluatorOptions::builder()
            .workers(1)
            .sort(EvalSortType::Surrogate)
            .max_surrogate_eval(1)
            .build()
            .unwrap();
        let evc = control(counting(calls.clone()), options).with_surrogate(surrogate);
        let mut rng = RandomNumberGenerator::from_seed(1);

        let res = evc.run(Batch::new(batch_of(&[1.0, 3.0, 2.0])), &mut rng);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(res.points.len(), 3);
        assert_eq!(evc.surrogate_evals(), 1);
        assert!(evc.global_stop_reason().is(EvalGlobalStop::MaxSurrogateEvalReached));
        assert!(!evc.global_stop_reason().terminates());
    }

    #[test]
    fn test_empty_batch() {
        let evc = control(counting(Arc::new(AtomicUsize::new(0))), EvaluatorOptions::default());
        let mut rng = RandomNumberGenerator::from_seed(1);
        let res = evc.run(Batch::new(Vec::new()), &mut rng);
        assert!(res.stop.is(EvalMainThreadStop::EmptyListOfPoints));
    }
}
