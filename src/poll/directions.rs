//! Direction sets for the poll.

use crate::error::{MadsError, Result};
use crate::point::Direction;
use crate::rng::RandomNumberGenerator;

use super::PollStrategy;

/// Attempts at drawing a usable random direction before giving up.
const MAX_DRAWS: usize = 10;

/// A direction drawn uniformly on the unit sphere of dimension `n`.
pub fn random_unit(n: usize, rng: &mut RandomNumberGenerator) -> Result<Direction> {
    for _ in 0..MAX_DRAWS {
        let d = Direction::new(rng.unit_normal(n));
        let norm = d.norm();
        if norm > 0.0 && norm.is_finite() {
            return Ok(d.scaled(1.0 / norm));
        }
    }
    Err(MadsError::Generation(
        "could not draw a non-zero random direction".to_string(),
    ))
}

/// Builds the directions of `strategy` in dimension `n`, before scaling.
///
/// # Errors
///
/// Returns [`MadsError::Generation`] when `n` is zero or the basis is
/// degenerate.
pub fn generate(
    strategy: PollStrategy,
    n: usize,
    rng: &mut RandomNumberGenerator,
) -> Result<Vec<Direction>> {
    if n == 0 {
        return Err(MadsError::Generation(
            "cannot poll in dimension 0".to_string(),
        ));
    }
    let dirs = match strategy {
        PollStrategy::Ortho2N => (0..n)
            .flat_map(|i| {
                let e = Direction::unit(n, i);
                let minus = e.neg();
                [e, minus]
            })
            .collect(),
        PollStrategy::Double => {
            let v = random_unit(n, rng)?;
            let minus = v.neg();
            vec![v, minus]
        }
        PollStrategy::Random2N => Direction::householder(&random_unit(n, rng)?)?
            .into_iter()
            .flat_map(|h| {
                let minus = h.neg();
                [h, minus]
            })
            .collect(),
        PollStrategy::NPlus1 => {
            let basis = Direction::householder(&random_unit(n, rng)?)?;
            let mut sum = vec![0.0; n];
            for h in &basis {
                for (s, c) in sum.iter_mut().zip(h.coords()) {
                    *s += c;
                }
            }
            let mut dirs = basis;
            dirs.push(Direction::new(sum).neg());
            dirs
        }
    };
    if dirs.iter().any(|d| d.is_zero() || !d.norm_inf().is_finite()) {
        return Err(MadsError::Generation(
            "degenerate poll direction".to_string(),
        ));
    }
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ortho_2n() {
        let mut rng = RandomNumberGenerator::from_seed(0);
        let dirs = generate(PollStrategy::Ortho2N, 2, &mut rng).unwrap();
        let coords: Vec<Vec<f64>> = dirs.iter().map(|d| d.coords().to_vec()).collect();
        assert_eq!(
            coords,
            vec![vec![1.0, 0.0], vec![-1.0, 0.0], vec![0.0, 1.0], vec![0.0, -1.0]]
        );
    }

    #[test]
    fn test_random_2n_is_orthogonal() {
        let mut rng = RandomNumberGenerator::from_seed(3);
        let dirs = generate(PollStrategy::Random2N, 4, &mut rng).unwrap();
        assert_eq!(dirs.len(), 8);
        for i in (0..8).step_by(2) {
            for j in (0..8).step_by(2) {
                if i != j {
                    assert!(dirs[i].dot(&dirs[j]).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_n_plus_1_positive_spanning() {
        let mut rng = RandomNumberGenerator::from_seed(5);
        let dirs = generate(PollStrategy::NPlus1, 3, &mut rng).unwrap();
        assert_eq!(dirs.len(), 4);
        let total: Vec<f64> = (0..3)
            .map(|k| dirs.iter().map(|d| d[k]).sum::<f64>())
            .collect();
        assert!(total.iter().all(|t| t.abs() < 1e-9));
    }

    #[test]
    fn test_double_is_opposite_pair() {
        let mut rng = RandomNumberGenerator::from_seed(9);
        let dirs = generate(PollStrategy::Double, 5, &mut rng).unwrap();
        assert_eq!(dirs.len(), 2);
        assert!((dirs[0].dot(&dirs[1]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_dimension_fails() {
        let mut rng = RandomNumberGenerator::from_seed(0);
        assert!(matches!(
            generate(PollStrategy::Ortho2N, 0, &mut rng),
            Err(MadsError::Generation(_))
        ));
    }
}
