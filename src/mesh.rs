//! # Granular mesh
//!
//! Each variable `i` carries a frame size `Delta_i = g_i * a_i * 10^b_i`, with
//! a mantissa `a_i` in `{1, 2, 5}`, an exponent `b_i` and a granularity `g_i`
//! (`g_i = 1` when the variable is continuous). The mesh size follows from the
//! exponent and its initial value `b0_i`:
//!
//! ```text
//! delta_i = 10^(b_i - |b_i - b0_i|)           continuous variable
//! delta_i = g_i * max(1, 10^(b_i - |b_i - b0_i|))   granular variable
//! ```
//!
//! so `delta_i <= Delta_i` always holds and the ratio `rho_i = Delta_i / delta_i`
//! grows as the frame shrinks. Enlarging moves the mantissa one step up
//! (`1 -> 2 -> 5 -> 10`), refining one step down.
//!
//! ## Example
//!
//! ```rust
//! use mads::mesh::Mesh;
//!
//! let mut mesh = Mesh::new(&[1.0, 1.0], &[0.0, 0.0]).unwrap();
//! assert_eq!(mesh.delta_frame(0), 1.0);
//!
//! mesh.refine();
//! assert!((mesh.delta_frame(0) - 0.5).abs() < 1e-12);
//! assert!(mesh.delta_mesh(0) <= mesh.delta_frame(0));
//! ```

use crate::error::{MadsError, Result};
use crate::point::{check_dim, Direction, Point};
use crate::stop::MadsStop;

/// Default ratio test for anisotropic enlargement.
pub const DEFAULT_ANISOTROPY_FACTOR: f64 = 0.1;

/// Default minimal mesh size.
pub const DEFAULT_MIN_MESH_SIZE: f64 = 1e-9;

/// Below this mesh size double precision cannot separate neighbouring points.
const MESH_PRECISION: f64 = 1e-13;

/// Exponents are kept far from the `f64` range limits.
const MAX_EXPONENT: i32 = 300;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mesh {
    init_exp: Vec<i32>,
    exp: Vec<i32>,
    mant: Vec<u8>,
    granularity: Vec<f64>,
    min_mesh_size: Vec<f64>,
    min_frame_size: Option<Vec<f64>>,
    anisotropy_factor: Option<f64>,
}

impl Mesh {
    /// Creates a mesh whose frame sizes are the closest `{1, 2, 5} * 10^b`
    /// values to `initial_frame_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if the vectors differ in length, a frame size is not
    /// strictly positive and finite, or a granularity is negative.
    pub fn new(initial_frame_size: &[f64], granularity: &[f64]) -> Result<Self> {
        check_dim(initial_frame_size.len(), granularity.len())?;
        let n = initial_frame_size.len();
        if n == 0 {
            return Err(MadsError::Configuration(
                "mesh dimension cannot be zero".to_string(),
            ));
        }

        let mut exp = Vec::with_capacity(n);
        let mut mant = Vec::with_capacity(n);
        for (i, (&frame, &g)) in initial_frame_size.iter().zip(granularity).enumerate() {
            if !(frame.is_finite() && frame > 0.0) {
                return Err(MadsError::InvalidNumericValue(format!(
                    "initial frame size {} for variable {} must be positive",
                    frame, i
                )));
            }
            if !(g.is_finite() && g >= 0.0) {
                return Err(MadsError::InvalidNumericValue(format!(
                    "granularity {} for variable {} must be non-negative",
                    g, i
                )));
            }
            let (a, b) = decompose(frame, g);
            mant.push(a);
            exp.push(b);
        }

        Ok(Self {
            init_exp: exp.clone(),
            exp,
            mant,
            granularity: granularity.to_vec(),
            min_mesh_size: vec![DEFAULT_MIN_MESH_SIZE; n],
            min_frame_size: None,
            anisotropy_factor: Some(DEFAULT_ANISOTROPY_FACTOR),
        })
    }

    pub fn with_min_mesh_size(mut self, min_mesh_size: Vec<f64>) -> Self {
        self.min_mesh_size = min_mesh_size;
        self
    }

    pub fn with_min_frame_size(mut self, min_frame_size: Option<Vec<f64>>) -> Self {
        self.min_frame_size = min_frame_size;
        self
    }

    /// `None` makes every enlargement isotropic.
    pub fn with_anisotropy(mut self, factor: Option<f64>) -> Self {
        self.anisotropy_factor = factor;
        self
    }

    pub fn dim(&self) -> usize {
        self.exp.len()
    }

    fn unit(&self, i: usize) -> f64 {
        if self.granularity[i] > 0.0 {
            self.granularity[i]
        } else {
            1.0
        }
    }

    /// Mesh size `delta_i`.
    pub fn delta_mesh(&self, i: usize) -> f64 {
        let shift = self.exp[i] - (self.exp[i] - self.init_exp[i]).abs();
        let delta = 10f64.powi(shift);
        if self.granularity[i] > 0.0 {
            self.granularity[i] * delta.max(1.0)
        } else {
            delta
        }
    }

    /// Frame size `Delta_i`.
    pub fn delta_frame(&self, i: usize) -> f64 {
        self.unit(i) * f64::from(self.mant[i]) * 10f64.powi(self.exp[i])
    }

    /// Ratio `Delta_i / delta_i`.
    pub fn rho(&self, i: usize) -> f64 {
        let pow_diff = 10f64.powi((self.exp[i] - self.init_exp[i]).abs());
        let a = f64::from(self.mant[i]);
        if self.granularity[i] > 0.0 {
            a * 10f64.powi(self.exp[i]).min(pow_diff)
        } else {
            a * pow_diff
        }
    }

    pub fn mesh_sizes(&self) -> Vec<f64> {
        (0..self.dim()).map(|i| self.delta_mesh(i)).collect()
    }

    pub fn frame_sizes(&self) -> Vec<f64> {
        (0..self.dim()).map(|i| self.delta_frame(i)).collect()
    }

    /// Integer position of the frame size on the `{1, 2, 5} * 10^b` ladder.
    pub fn mesh_index(&self, i: usize) -> i32 {
        let step = match self.mant[i] {
            1 => 0,
            2 => 1,
            _ => 2,
        };
        3 * self.exp[i] + step
    }

    /// Enlarges the frame after a full success along `direction`.
    ///
    /// When anisotropy is on and a direction is given, only the variables
    /// the direction moved significantly along are enlarged, plus continuous
    /// variables that lag far behind the others.
    ///
    /// # Returns
    ///
    /// `true` when at least one frame size changed.
    pub fn enlarge(&mut self, direction: Option<&Direction>) -> bool {
        let n = self.dim();
        let min_rho = (0..n)
            .filter(|&i| self.granularity[i] == 0.0)
            .map(|i| self.rho(i))
            .fold(f64::INFINITY, f64::min);
        let direction = direction.filter(|d| d.dim() == n && !d.is_zero());

        let mut changed = false;
        for i in 0..n {
            let grow = match (self.anisotropy_factor, direction) {
                (Some(factor), Some(dir)) => {
                    dir[i].abs() / self.delta_mesh(i) / self.rho(i) > factor
                        || (self.granularity[i] == 0.0
                            && self.exp[i] < self.init_exp[i]
                            && self.rho(i) > min_rho * min_rho)
                }
                _ => true,
            };
            if grow && self.exp[i] < MAX_EXPONENT {
                let (a, b) = larger(self.mant[i], self.exp[i]);
                self.mant[i] = a;
                self.exp[i] = b;
                changed = true;
            }
        }
        changed
    }

    /// Shrinks the frame after a failed iteration.
    ///
    /// A variable whose mesh size already went below its minimum is left
    /// untouched.
    pub fn refine(&mut self) {
        for i in 0..self.dim() {
            let (a, b) = smaller(self.mant[i], self.exp[i], self.granularity[i]);
            if self.min_mesh_size[i] <= self.delta_mesh(i) && b > -MAX_EXPONENT {
                self.mant[i] = a;
                self.exp[i] = b;
            }
        }
    }

    /// Mesh-driven stop test, restricted to `vars` when given.
    ///
    /// Granular variables never trigger the minimal mesh size test; a mesh
    /// made only of granular variables never stops on size.
    pub fn check_for_stopping(&self, vars: Option<&[usize]>) -> Option<MadsStop> {
        let all: Vec<usize>;
        let vars = match vars {
            Some(v) => v,
            None => {
                all = (0..self.dim()).collect();
                &all
            }
        };
        if vars.is_empty() {
            return None;
        }

        let all_granular = vars.iter().all(|&i| self.granularity[i] > 0.0);
        if !all_granular {
            let continuous: Vec<usize> = vars
                .iter()
                .copied()
                .filter(|&i| self.granularity[i] == 0.0)
                .collect();
            if continuous
                .iter()
                .all(|&i| self.delta_mesh(i) < self.min_mesh_size[i])
            {
                return Some(MadsStop::MinMeshSizeReached);
            }
            if continuous.iter().any(|&i| self.delta_mesh(i) < MESH_PRECISION) {
                return Some(MadsStop::MeshPrecReached);
            }
            if let Some(min_frame) = &self.min_frame_size {
                if vars.iter().all(|&i| self.delta_frame(i) < min_frame[i]) {
                    return Some(MadsStop::MinFrameSizeReached);
                }
            }
        }
        None
    }

    /// Scales a direction to the frame and rounds it on the mesh:
    /// `round(rho_i * d_i / |d|_inf) * delta_i`, rounding half away from zero.
    ///
    /// # Errors
    ///
    /// Returns `MadsError::Generation` for a zero or non-finite direction and
    /// `MadsError::Dimension` when the direction does not match the mesh.
    pub fn scale_and_project(&self, direction: &Direction) -> Result<Direction> {
        check_dim(self.dim(), direction.dim())?;
        let norm = direction.norm_inf();
        if norm == 0.0 || !norm.is_finite() {
            return Err(MadsError::Generation(
                "cannot scale a direction with a zero or infinite norm".to_string(),
            ));
        }
        Ok(Direction::new(
            (0..self.dim())
                .map(|i| (self.rho(i) * direction[i] / norm).round() * self.delta_mesh(i))
                .collect(),
        ))
    }

    /// Rounds `x` to the nearest point of the mesh anchored at `center`.
    pub fn project_on_mesh(&self, x: &Point, center: &Point) -> Point {
        Point::new(
            (0..x.dim())
                .map(|i| {
                    let (xi, ci) = (x[i], center.coords().get(i).copied().unwrap_or(0.0));
                    if !xi.is_finite() || !ci.is_finite() || i >= self.dim() {
                        return xi;
                    }
                    let delta = self.delta_mesh(i);
                    ci + ((xi - ci) / delta).round() * delta
                })
                .collect(),
        )
    }

    /// Returns `true` when `x - center` is a multiple of the mesh size in
    /// every variable, up to a relative tolerance.
    pub fn is_on_mesh(&self, x: &Point, center: &Point) -> bool {
        x.dim() == self.dim()
            && (0..self.dim()).all(|i| {
                let steps = (x[i] - center[i]) / self.delta_mesh(i);
                (steps - steps.round()).abs() < 1e-6
            })
    }
}

/// Closest `(mantissa, exponent)` pair for a frame size.
fn decompose(frame: f64, granularity: f64) -> (u8, i32) {
    let ratio = if granularity > 0.0 {
        frame / granularity
    } else {
        frame
    };
    let mut exp = ratio.log10().floor() as i32;
    let scaled = ratio / 10f64.powi(exp);
    let mant = if scaled < 1.5 {
        1
    } else if scaled < 3.5 {
        2
    } else if scaled < 7.5 {
        5
    } else {
        exp += 1;
        1
    };
    if granularity > 0.0 && exp < 0 {
        return (1, 0);
    }
    (mant, exp)
}

fn larger(mant: u8, exp: i32) -> (u8, i32) {
    match mant {
        1 => (2, exp),
        2 => (5, exp),
        _ => (1, exp + 1),
    }
}

fn smaller(mant: u8, exp: i32, granularity: f64) -> (u8, i32) {
    let (a, b) = match mant {
        1 => (5, exp - 1),
        2 => (1, exp),
        _ => (2, exp),
    };
    if granularity > 0.0 && b <= 0 && a != 1 {
        return (1, 0);
    }
    (a, b)
}
