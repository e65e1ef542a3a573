//! Dispatch ordering.
//!
//! Priorities only decide which queued point a worker takes next. Lower
//! keys go first and ties fall back to submission order.

use std::cmp::Ordering;

use crate::caching::ReservedSlot;
use crate::eval::EvalPoint;
use crate::point::Direction;
use crate::rng::RandomNumberGenerator;

/// How queued points are ordered for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EvalSortType {
    /// Order of submission.
    #[default]
    Submission,
    /// Most aligned with the last successful direction first.
    LastSuccessDirection,
    /// Uniformly shuffled.
    Random,
    /// Best predicted `(h, f)` from the static surrogate first.
    Surrogate,
}

/// Dispatch key, compared lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Priority {
    primary: f64,
    secondary: f64,
}

impl Priority {
    pub fn new(primary: f64, secondary: f64) -> Self {
        Self { primary, secondary }
    }

    /// Minus the cosine between the point's displacement from its frame
    /// center and `last`; neutral when either is unknown.
    pub fn from_direction(point: &EvalPoint, last: Option<&Direction>) -> Self {
        let cosine = last.and_then(|l| point.direction().and_then(|d| d.cosine(l)));
        Self::new(cosine.map_or(0.0, |c| -c), 0.0)
    }

    pub fn random(rng: &mut RandomNumberGenerator) -> Self {
        Self::new(rng.unit(), 0.0)
    }

    /// `(h, f)` of a surrogate evaluation, worst possible when it failed.
    pub fn from_surrogate(surrogate: Option<&EvalPoint>) -> Self {
        match surrogate.filter(|p| p.is_ok()) {
            Some(p) => Self::new(
                p.h().unwrap_or(f64::INFINITY),
                p.f().unwrap_or(f64::INFINITY),
            ),
            None => Self::new(f64::INFINITY, f64::INFINITY),
        }
    }

    fn key_cmp(&self, other: &Self) -> Ordering {
        self.primary
            .total_cmp(&other.primary)
            .then(self.secondary.total_cmp(&other.secondary))
    }
}

/// A point waiting in the dispatch queue, with the cache slot it will fill.
#[derive(Debug)]
pub struct EvalQueuePoint {
    pub(crate) point: EvalPoint,
    pub(crate) priority: Priority,
    /// Position in the deduplicated submission.
    pub(crate) seq: usize,
    pub(crate) generation: u64,
    pub(crate) slot: Option<ReservedSlot>,
}

impl EvalQueuePoint {
    pub(crate) fn new(
        point: EvalPoint,
        priority: Priority,
        seq: usize,
        generation: u64,
        slot: Option<ReservedSlot>,
    ) -> Self {
        Self {
            point,
            priority,
            seq,
            generation,
            slot,
        }
    }

    pub fn point(&self) -> &EvalPoint {
        &self.point
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// `BinaryHeap` pops the greatest element: the smallest key with the
// smallest sequence number must compare greatest.
impl Ord for EvalQueuePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .key_cmp(&self.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for EvalQueuePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for EvalQueuePoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EvalQueuePoint {}
