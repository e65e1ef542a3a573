//! # Progressive barrier
//!
//! The barrier keeps at most one best feasible point and a bounded Pareto
//! front of infeasible points under `(h, f)`, sorted by increasing `h`.
//! Points whose violation exceeds `h_max` are rejected, and `h_max` shrinks
//! as the run finds less violating points.

use super::success::{compute_success_type, dominates, SuccessType};
use super::EvalPoint;

/// Default capacity of the infeasible front.
pub const DEFAULT_MAX_INFEASIBLE: usize = 50;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Barrier {
    feasible: Option<EvalPoint>,
    infeasible: Vec<EvalPoint>,
    h_max: f64,
    h_tolerance: f64,
    max_infeasible: usize,
}

impl Barrier {
    /// # Arguments
    ///
    /// * `h_tolerance` - A point with `h <= h_tolerance` is feasible.
    /// * `max_infeasible` - Capacity of the infeasible front, at least 1.
    pub fn new(h_tolerance: f64, max_infeasible: usize) -> Self {
        Self {
            feasible: None,
            infeasible: Vec::new(),
            h_max: f64::INFINITY,
            h_tolerance,
            max_infeasible: max_infeasible.max(1),
        }
    }

    pub fn best_feasible(&self) -> Option<&EvalPoint> {
        self.feasible.as_ref()
    }

    /// The infeasible front, by increasing `h`.
    pub fn infeasible(&self) -> &[EvalPoint] {
        &self.infeasible
    }

    /// The least violating infeasible point.
    pub fn best_infeasible(&self) -> Option<&EvalPoint> {
        self.infeasible.first()
    }

    pub fn h_max(&self) -> f64 {
        self.h_max
    }

    pub fn h_tolerance(&self) -> f64 {
        self.h_tolerance
    }

    pub fn is_empty(&self) -> bool {
        self.feasible.is_none() && self.infeasible.is_empty()
    }

    pub fn is_feasible(&self, p: &EvalPoint) -> bool {
        p.is_feasible(self.h_tolerance)
    }

    /// Classifies `p` and, on success, stores it.
    ///
    /// Insertion into the front is append-then-prune: the point is added
    /// first, entries it dominates are removed afterwards, and the largest
    /// `h` values are dropped when the front is over capacity.
    pub fn insert(&mut self, p: &EvalPoint) -> SuccessType {
        let success = compute_success_type(p, self);
        match success {
            SuccessType::FullSuccess => self.feasible = Some(p.clone()),
            SuccessType::PartialSuccess => {
                self.infeasible.push(p.clone());
                self.prune();
            }
            SuccessType::NoSuccess | SuccessType::NotEvaluated => {}
        }
        success
    }

    /// Inserts several points and returns the best success observed.
    pub fn insert_all<'a, I>(&mut self, points: I) -> SuccessType
    where
        I: IntoIterator<Item = &'a EvalPoint>,
    {
        points
            .into_iter()
            .map(|p| self.insert(p))
            .max()
            .unwrap_or_default()
    }

    /// Progressive update after an iteration whose best outcome was a partial
    /// success: `h_max` becomes the largest `h` of the front that is strictly
    /// below `reference_h`, the violation of the reference infeasible point
    /// before the iteration.
    pub fn tighten_h_max(&mut self, reference_h: f64) {
        let below = self
            .infeasible
            .iter()
            .filter_map(EvalPoint::h)
            .filter(|&h| h < reference_h)
            .fold(None, |acc: Option<f64>, h| Some(acc.map_or(h, |a| a.max(h))));
        if let Some(h_max) = below {
            self.h_max = h_max;
            self.infeasible
                .retain(|p| p.h().map_or(false, |h| h <= h_max));
        }
    }

    /// The center of the primary poll: the best feasible point, else the
    /// least violating infeasible one.
    pub fn primary_center(&self) -> Option<&EvalPoint> {
        self.best_feasible().or_else(|| self.best_infeasible())
    }

    /// The center of the secondary poll, present only when the primary center
    /// is feasible and an infeasible incumbent also exists.
    pub fn secondary_center(&self) -> Option<&EvalPoint> {
        self.feasible.as_ref().and(self.best_infeasible())
    }

    /// Every incumbent, feasible first.
    pub fn incumbents(&self) -> impl Iterator<Item = &EvalPoint> {
        self.feasible.iter().chain(self.infeasible.iter())
    }

    fn prune(&mut self) {
        let keys: Vec<(f64, f64)> = self
            .infeasible
            .iter()
            .map(|p| (p.h().unwrap_or(f64::INFINITY), p.f().unwrap_or(f64::INFINITY)))
            .collect();
        let mut keep: Vec<bool> = (0..keys.len())
            .map(|i| !keys.iter().any(|&other| dominates(other, keys[i])))
            .collect();
        // Equal keys: the older entry stays.
        for i in 0..keys.len() {
            if keep[i] && (0..i).any(|j| keep[j] && keys[j] == keys[i]) {
                keep[i] = false;
            }
        }
        let mut idx = 0;
        self.infeasible.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
        self.infeasible.sort_by(|a, b| {
            let (ha, hb) = (a.h().unwrap_or(f64::INFINITY), b.h().unwrap_or(f64::INFINITY));
            ha.total_cmp(&hb)
        });
        self.infeasible.truncate(self.max_infeasible);
    }
}
