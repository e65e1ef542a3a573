//! # Points, directions and bounds
//!
//! A [`Point`] is a fixed-dimension vector of coordinates. A coordinate may be
//! undefined (stored as NaN) while a point is being assembled; a point with an
//! undefined coordinate cannot be evaluated. A [`Direction`] is the difference
//! of two points and carries the linear algebra the poll needs.

use std::fmt;
use std::ops::Index;

use crate::error::{MadsError, Result};

/// An ordered sequence of coordinates whose dimension never changes.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    coords: Vec<f64>,
}

impl Point {
    pub fn new(coords: Vec<f64>) -> Self {
        Self { coords }
    }

    /// A point of dimension `n` with every coordinate undefined.
    pub fn undefined(n: usize) -> Self {
        Self {
            coords: vec![f64::NAN; n],
        }
    }

    pub fn dim(&self) -> usize {
        self.coords.len()
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn is_defined(&self, i: usize) -> bool {
        self.coords.get(i).map_or(false, |c| !c.is_nan())
    }

    /// Returns `true` when every coordinate is defined.
    pub fn is_complete(&self) -> bool {
        self.coords.iter().all(|c| !c.is_nan())
    }

    /// Returns a copy with coordinate `i` replaced.
    pub fn with_coord(&self, i: usize, value: f64) -> Self {
        let mut coords = self.coords.clone();
        if let Some(c) = coords.get_mut(i) {
            *c = value;
        }
        Self { coords }
    }

    /// `self + direction`.
    ///
    /// # Errors
    ///
    /// Returns `MadsError::Dimension` when the dimensions differ.
    pub fn offset(&self, direction: &Direction) -> Result<Point> {
        check_dim(self.dim(), direction.dim())?;
        Ok(Point::new(
            self.coords
                .iter()
                .zip(direction.coords())
                .map(|(x, d)| x + d)
                .collect(),
        ))
    }

    /// The direction going from `origin` to `self`.
    pub fn minus(&self, origin: &Point) -> Result<Direction> {
        check_dim(self.dim(), origin.dim())?;
        Ok(Direction::new(
            self.coords
                .iter()
                .zip(origin.coords())
                .map(|(x, o)| x - o)
                .collect(),
        ))
    }

    /// Infinity-norm distance, `+inf` on a dimension mismatch.
    pub fn dist_inf(&self, other: &Point) -> f64 {
        if self.dim() != other.dim() {
            return f64::INFINITY;
        }
        self.coords
            .iter()
            .zip(other.coords())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl Index<usize> for Point {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.coords[i]
    }
}

impl From<Vec<f64>> for Point {
    fn from(coords: Vec<f64>) -> Self {
        Self::new(coords)
    }
}

impl From<&[f64]> for Point {
    fn from(coords: &[f64]) -> Self {
        Self::new(coords.to_vec())
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for c in &self.coords {
            write!(f, " {}", c)?;
        }
        write!(f, " )")
    }
}

/// A displacement in variable space.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Direction {
    coords: Vec<f64>,
}

impl Direction {
    pub fn new(coords: Vec<f64>) -> Self {
        Self { coords }
    }

    pub fn zeros(n: usize) -> Self {
        Self {
            coords: vec![0.0; n],
        }
    }

    /// The `i`-th coordinate vector of dimension `n`.
    pub fn unit(n: usize, i: usize) -> Self {
        let mut coords = vec![0.0; n];
        if i < n {
            coords[i] = 1.0;
        }
        Self { coords }
    }

    pub fn dim(&self) -> usize {
        self.coords.len()
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn norm_inf(&self) -> f64 {
        self.coords.iter().map(|c| c.abs()).fold(0.0, f64::max)
    }

    pub fn squared_norm(&self) -> f64 {
        self.coords.iter().map(|c| c * c).sum()
    }

    pub fn norm(&self) -> f64 {
        self.squared_norm().sqrt()
    }

    pub fn is_zero(&self) -> bool {
        self.coords.iter().all(|&c| c == 0.0)
    }

    pub fn dot(&self, other: &Direction) -> f64 {
        self.coords
            .iter()
            .zip(other.coords())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Cosine of the angle between two directions, `None` if either is zero
    /// or the dimensions differ.
    pub fn cosine(&self, other: &Direction) -> Option<f64> {
        if self.dim() != other.dim() {
            return None;
        }
        let denom = self.norm() * other.norm();
        if denom == 0.0 || !denom.is_finite() {
            return None;
        }
        Some(self.dot(other) / denom)
    }

    pub fn neg(&self) -> Direction {
        Direction::new(self.coords.iter().map(|c| -c).collect())
    }

    pub fn scaled(&self, factor: f64) -> Direction {
        Direction::new(self.coords.iter().map(|c| c * factor).collect())
    }

    /// Embeds a direction of the subspace spanned by `vars` into dimension `n`.
    pub fn embed(&self, n: usize, vars: &[usize]) -> Direction {
        let mut coords = vec![0.0; n];
        for (value, &i) in self.coords.iter().zip(vars) {
            if i < n {
                coords[i] = *value;
            }
        }
        Direction::new(coords)
    }

    /// Columns of the Householder matrix `H = |v|^2 I - 2 v v^T`.
    ///
    /// The columns are mutually orthogonal and all have norm `|v|^2`, so they
    /// form a scaled orthogonal basis whose orientation depends on `v`.
    ///
    /// # Errors
    ///
    /// Returns `MadsError::Generation` if `v` is zero or not finite.
    pub fn householder(v: &Direction) -> Result<Vec<Direction>> {
        let sq = v.squared_norm();
        if sq == 0.0 || !sq.is_finite() {
            return Err(MadsError::Generation(
                "cannot build a Householder basis from a degenerate vector".to_string(),
            ));
        }
        let n = v.dim();
        Ok((0..n)
            .map(|j| {
                Direction::new(
                    (0..n)
                        .map(|i| {
                            let identity = if i == j { sq } else { 0.0 };
                            identity - 2.0 * v.coords[i] * v.coords[j]
                        })
                        .collect(),
                )
            })
            .collect())
    }
}

impl Index<usize> for Direction {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.coords[i]
    }
}

/// Box constraints `lower <= x <= upper`; infinite entries mean unbounded.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Bounds {
    /// # Errors
    ///
    /// Returns an error when the vectors differ in length, contain NaN or
    /// when some lower bound exceeds its upper bound.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self> {
        check_dim(lower.len(), upper.len())?;
        for (i, (lb, ub)) in lower.iter().zip(&upper).enumerate() {
            if lb.is_nan() || ub.is_nan() {
                return Err(MadsError::InvalidNumericValue(format!(
                    "bound {} is NaN",
                    i
                )));
            }
            if lb > ub {
                return Err(MadsError::Configuration(format!(
                    "lower bound {} exceeds upper bound {} for variable {}",
                    lb, ub, i
                )));
            }
        }
        Ok(Self { lower, upper })
    }

    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Returns `true` when every variable has two finite bounds.
    pub fn is_finite(&self) -> bool {
        self.lower
            .iter()
            .chain(&self.upper)
            .all(|b| b.is_finite())
    }

    pub fn contains(&self, x: &Point) -> bool {
        x.dim() == self.dim()
            && x
                .coords()
                .iter()
                .enumerate()
                .all(|(i, c)| *c >= self.lower[i] && *c <= self.upper[i])
    }

    /// Clamps every coordinate into its bounds.
    pub fn snap(&self, x: &Point) -> Point {
        Point::new(
            x.coords()
                .iter()
                .enumerate()
                .map(|(i, &c)| match (self.lower.get(i), self.upper.get(i)) {
                    (Some(&lb), Some(&ub)) => c.max(lb).min(ub),
                    _ => c,
                })
                .collect(),
        )
    }
}

pub(crate) fn check_dim(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(MadsError::Dimension { expected, actual });
    }
    Ok(())
}
