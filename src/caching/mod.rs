//! # Caching Module
//!
//! The evaluation cache maps the coordinates of a point, together with the
//! [`EvalType`] it was evaluated with, to its evaluation record. Blackbox and
//! surrogate results for the same coordinates coexist; model evaluations are
//! never cached.
//!
//! Each key owns a slot that is either in progress, done, or abandoned (the
//! evaluation was reserved but never dispatched). Reserving a key that has no
//! slot creates an in-progress slot; anyone else asking for the same key while
//! it is in progress attaches to it and waits, so at most one evaluation per
//! key is ever in flight. Lookups take a shared lock; only slot creation takes
//! the exclusive one. No lock is held while a point is evaluated.
//!
//! ## Example
//!
//! ```rust
//! use mads::caching::{Cache, Reservation};
//! use mads::eval::{BbOutput, Constraints, EvalPoint, EvalType, StepType};
//! use mads::point::Point;
//!
//! let cache = Cache::new();
//! let x = Point::new(vec![1.0, 2.0]);
//!
//! let Reservation::Reserved(slot) = cache.reserve(&x, EvalType::Blackbox) else {
//!     panic!("fresh key");
//! };
//! let mut p = EvalPoint::new(x.clone(), StepType::X0);
//! p.record(Ok(BbOutput::unconstrained(3.0)), &Constraints::default());
//! slot.complete(&p);
//!
//! assert!(matches!(cache.reserve(&x, EvalType::Blackbox), Reservation::Hit(_)));
//! assert_eq!(cache.hits(), 1);
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::eval::{EvalPoint, EvalType};
use crate::point::Point;

/// A trait for values that can be used as cache keys.
///
/// Two values with the same key must evaluate to the same result.
pub trait CacheKey {
    /// The type of the cache key.
    type Key: Eq + Hash + Clone + Debug + Send + Sync;

    /// Generates the cache key for this value.
    fn cache_key(&self) -> Self::Key;
}

/// Bit patterns of the coordinates, with `-0.0` folded onto `0.0` and every
/// NaN onto one canonical NaN.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointKey(Vec<u64>);

impl CacheKey for Point {
    type Key = PointKey;

    fn cache_key(&self) -> PointKey {
        PointKey(
            self.coords()
                .iter()
                .map(|&c| {
                    if c == 0.0 {
                        0.0f64.to_bits()
                    } else if c.is_nan() {
                        f64::NAN.to_bits()
                    } else {
                        c.to_bits()
                    }
                })
                .collect(),
        )
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
enum SlotState {
    InProgress,
    Done(EvalPoint),
    Abandoned,
}

#[derive(Debug)]
struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn in_progress() -> Self {
        Self {
            state: Mutex::new(SlotState::InProgress),
            ready: Condvar::new(),
        }
    }

    fn done(point: EvalPoint) -> Self {
        Self {
            state: Mutex::new(SlotState::Done(point)),
            ready: Condvar::new(),
        }
    }

    fn snapshot(&self) -> SlotState {
        lock(&self.state).clone()
    }

    fn settle(&self, state: SlotState) {
        let mut current = lock(&self.state);
        if matches!(*current, SlotState::InProgress) {
            *current = state;
        }
        self.ready.notify_all();
    }
}

/// Outcome of [`Cache::reserve`].
#[derive(Debug)]
pub enum Reservation {
    /// A completed evaluation exists; it is returned as is.
    Hit(EvalPoint),
    /// Someone else is evaluating the key.
    InFlight(PendingEval),
    /// The caller now owns the evaluation of the key.
    Reserved(ReservedSlot),
}

/// A handle on an evaluation in flight elsewhere.
#[derive(Debug, Clone)]
pub struct PendingEval {
    slot: Arc<Slot>,
}

impl PendingEval {
    /// Blocks until the owner completes or abandons the evaluation.
    ///
    /// # Returns
    ///
    /// The completed record, or `None` when it was abandoned.
    pub fn wait(&self) -> Option<EvalPoint> {
        let mut state = lock(&self.slot.state);
        while matches!(*state, SlotState::InProgress) {
            state = self
                .slot
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match &*state {
            SlotState::Done(point) => Some(point.clone()),
            _ => None,
        }
    }
}

/// Ownership of an in-progress slot.
///
/// Dropping it without calling [`ReservedSlot::complete`] abandons the slot,
/// which wakes the waiters and lets a later reservation retry the key.
#[derive(Debug)]
pub struct ReservedSlot {
    slot: Arc<Slot>,
    settled: bool,
}

impl ReservedSlot {
    pub fn complete(mut self, point: &EvalPoint) {
        self.slot.settle(SlotState::Done(point.clone()));
        self.settled = true;
    }

    pub fn abandon(mut self) {
        self.slot.settle(SlotState::Abandoned);
        self.settled = true;
    }
}

impl Drop for ReservedSlot {
    fn drop(&mut self) {
        if !self.settled {
            self.slot.settle(SlotState::Abandoned);
        }
    }
}

/// The evaluation cache, shared by every run attached to one evaluator control.
#[derive(Debug, Default)]
pub struct Cache {
    entries: RwLock<HashMap<(PointKey, EvalType), Arc<Slot>>>,
    hits: AtomicUsize,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache pre-populated with earlier evaluations.
    pub fn with_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = EvalPoint>,
    {
        let cache = Self::new();
        cache.seed(points);
        cache
    }

    /// Looks `point` up and, when nobody holds it, reserves it for the caller.
    pub fn reserve(&self, point: &Point, eval_type: EvalType) -> Reservation {
        let key = (point.cache_key(), eval_type);

        if let Some(slot) = read(&self.entries).get(&key).cloned() {
            if let Some(found) = self.classify(&slot) {
                return found;
            }
        }

        let mut entries = write(&self.entries);
        if let Some(slot) = entries.get(&key).cloned() {
            if let Some(found) = self.classify(&slot) {
                return found;
            }
        }
        let slot = Arc::new(Slot::in_progress());
        entries.insert(key, Arc::clone(&slot));
        Reservation::Reserved(ReservedSlot {
            slot,
            settled: false,
        })
    }

    fn classify(&self, slot: &Arc<Slot>) -> Option<Reservation> {
        match slot.snapshot() {
            SlotState::Done(point) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Reservation::Hit(point))
            }
            SlotState::InProgress => Some(Reservation::InFlight(PendingEval {
                slot: Arc::clone(slot),
            })),
            SlotState::Abandoned => None,
        }
    }

    /// The completed record for `point`, if any. Does not count as a hit.
    pub fn get(&self, point: &Point, eval_type: EvalType) -> Option<EvalPoint> {
        let slot = read(&self.entries)
            .get(&(point.cache_key(), eval_type))
            .cloned()?;
        match slot.snapshot() {
            SlotState::Done(p) => Some(p),
            _ => None,
        }
    }

    /// Inserts completed evaluations, for example from an earlier run.
    ///
    /// Points that are not evaluated, model evaluations and keys already
    /// present are skipped.
    ///
    /// # Returns
    ///
    /// The number of points inserted.
    pub fn seed<I>(&self, points: I) -> usize
    where
        I: IntoIterator<Item = EvalPoint>,
    {
        let mut entries = write(&self.entries);
        let mut inserted = 0;
        for point in points {
            if !point.status().is_done() || point.eval_type() == EvalType::Model {
                continue;
            }
            let key = (point.point().cache_key(), point.eval_type());
            let vacant = entries
                .get(&key)
                .map_or(true, |slot| matches!(slot.snapshot(), SlotState::Abandoned));
            if vacant {
                entries.insert(key, Arc::new(Slot::done(point)));
                inserted += 1;
            }
        }
        inserted
    }

    /// Every completed evaluation, in dispatch order.
    pub fn export(&self) -> Vec<EvalPoint> {
        self.find(|_| true)
    }

    /// Completed evaluations matching `pred`, in dispatch order.
    pub fn find<F>(&self, pred: F) -> Vec<EvalPoint>
    where
        F: Fn(&EvalPoint) -> bool,
    {
        let mut found: Vec<EvalPoint> = read(&self.entries)
            .values()
            .filter_map(|slot| match slot.snapshot() {
                SlotState::Done(p) if pred(&p) => Some(p),
                _ => None,
            })
            .collect();
        found.sort_by_key(EvalPoint::tag);
        found
    }

    /// Successful blackbox evaluations inside the box `center +- radius`.
    pub fn find_within(&self, center: &Point, radius: &[f64]) -> Vec<EvalPoint> {
        self.find(|p| {
            p.is_ok()
                && p.eval_type() == EvalType::Blackbox
                && p.point().dim() == center.dim()
                && p
                    .point()
                    .coords()
                    .iter()
                    .zip(center.coords())
                    .zip(radius)
                    .all(|((x, c), r)| (x - c).abs() <= *r)
        })
    }

    /// Number of completed evaluations.
    pub fn len(&self) -> usize {
        read(&self.entries)
            .values()
            .filter(|slot| matches!(slot.snapshot(), SlotState::Done(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently being evaluated.
    pub fn in_flight(&self) -> usize {
        read(&self.entries)
            .values()
            .filter(|slot| matches!(slot.snapshot(), SlotState::InProgress))
            .count()
    }

    /// Number of reservations answered from a completed record.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Drops every completed or abandoned entry. In-flight slots are kept.
    pub fn clear(&self) {
        write(&self.entries).retain(|_, slot| matches!(slot.snapshot(), SlotState::InProgress));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{BbOutput, Constraints, StepType};
    use std::thread;

    fn done(x: &[f64], f: f64) -> EvalPoint {
        let mut p = EvalPoint::new(Point::from(x), StepType::Poll);
        p.record(Ok(BbOutput::unconstrained(f)), &Constraints::default());
        p
    }

    #[test]
    fn test_key_folds_negative_zero() {
        let a = Point::new(vec![0.0, 1.0]);
        let b = Point::new(vec![-0.0, 1.0]);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), Point::new(vec![0.0, 1.5]).cache_key());
    }

    #[test]
    fn test_eval_types_coexist() {
        let cache = Cache::new();
        let x = Point::new(vec![1.0]);
        match cache.reserve(&x, EvalType::Blackbox) {
            Reservation::Reserved(slot) => slot.complete(&done(&[1.0], 2.0)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            cache.reserve(&x, EvalType::Surrogate),
            Reservation::Reserved(_)
        ));
        assert!(cache.get(&x, EvalType::Blackbox).is_some());
    }

    #[test]
    fn test_abandoned_slot_can_be_reserved_again() {
        let cache = Cache::new();
        let x = Point::new(vec![3.0]);
        let first = cache.reserve(&x, EvalType::Blackbox);
        let pending = match cache.reserve(&x, EvalType::Blackbox) {
            Reservation::InFlight(p) => p,
            other => panic!("unexpected {:?}", other),
        };
        drop(first);
        assert_eq!(pending.wait(), None);
        assert!(matches!(
            cache.reserve(&x, EvalType::Blackbox),
            Reservation::Reserved(_)
        ));
    }

    #[test]
    fn test_single_owner_under_contention() {
        let cache = Arc::new(Cache::new());
        let x = Point::new(vec![0.25, 0.75]);
        let owners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let owners = Arc::clone(&owners);
                let x = x.clone();
                thread::spawn(move || match cache.reserve(&x, EvalType::Blackbox) {
                    Reservation::Reserved(slot) => {
                        owners.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(cache.in_flight(), 1);
                        thread::sleep(std::time::Duration::from_millis(20));
                        slot.complete(&done(&[0.25, 0.75], 1.0));
                        Some(1.0)
                    }
                    Reservation::InFlight(pending) => pending.wait().and_then(|p| p.f()),
                    Reservation::Hit(p) => p.f(),
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(1.0));
        }
        assert_eq!(owners.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_seed_and_export() {
        let mut a = done(&[1.0], 1.0);
        a.set_tag(2);
        let mut b = done(&[2.0], 0.5);
        b.set_tag(1);
        let not_done = EvalPoint::new(Point::new(vec![3.0]), StepType::Poll);

        let cache = Cache::with_points(vec![a, b, not_done]);
        assert_eq!(cache.len(), 2);
        let exported = cache.export();
        assert_eq!(exported[0].point()[0], 2.0);
        assert_eq!(exported[1].point()[0], 1.0);

        assert_eq!(cache.seed(vec![done(&[1.0], 9.0)]), 0);
        assert_eq!(cache.get(&Point::new(vec![1.0]), EvalType::Blackbox).unwrap().f(), Some(1.0));

        let near = cache.find_within(&Point::new(vec![1.9]), &[0.2]);
        assert_eq!(near.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
