//! Deterministic point generation in the unit hypercube.
//!
//! Three schemes are supported: Latin-hypercube stratification, the Halton
//! low-discrepancy sequence and a regular mesh. Output depends only on
//! `(method, n, d, seed)`.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use cs_types::{
    validate_variables, CsError, CsResult, Point, SamplingMethod, Variable,
    MAX_LOW_DISCREPANCY_DIMS,
};

/// Halton bases, one per dimension.
pub const PRIME_BASES: [u64; MAX_LOW_DISCREPANCY_DIMS] =
    [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Van der Corput radical inverse of `index` in `base`, in [0, 1).
pub fn radical_inverse(mut index: u64, base: u64) -> f64 {
    let b = base as f64;
    let mut value = 0.0;
    let mut denom = 1.0;
    while index > 0 {
        let digit = index % base;
        index /= base;
        denom *= b;
        value += digit as f64 / denom;
    }
    value
}

/// A seeded sampler for one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampler {
    method: SamplingMethod,
    seed: u64,
}

impl Sampler {
    pub fn new(method: SamplingMethod, seed: u64) -> Self {
        Self { method, seed }
    }

    pub fn method(&self) -> SamplingMethod {
        self.method
    }

    /// `n` points in `[0,1]^d`. Grid sampling may return fewer than `n`.
    pub fn unit_points(&self, n: usize, d: usize) -> CsResult<Vec<Vec<f64>>> {
        if n == 0 {
            return Err(CsError::NonPositiveBudget);
        }
        if d == 0 {
            return Err(CsError::Config("cannot sample a zero-dimensional space".to_string()));
        }
        match self.method {
            SamplingMethod::Stratified => Ok(stratified(n, d, self.seed)),
            SamplingMethod::LowDiscrepancy => halton(n, d, self.seed),
            SamplingMethod::Grid => Ok(grid(n, d)),
        }
    }

    /// Sample and map into the variables' bounds.
    pub fn sample(&self, variables: &[Variable], n: usize) -> CsResult<Vec<Point>> {
        validate_variables(variables)?;
        let unit = self.unit_points(n, variables.len())?;
        Ok(unit.iter().map(|u| map_to_bounds(u, variables)).collect())
    }
}

/// Affine map of a unit point into `[lower, upper]` per variable.
///
/// Bounds are not checked here; an inverted variable yields its upper bound.
pub fn map_to_bounds(unit: &[f64], variables: &[Variable]) -> Point {
    variables
        .iter()
        .zip(unit)
        .map(|(var, u)| {
            let x = var.lower + u * var.width();
            (var.name.clone(), x.max(var.lower).min(var.upper))
        })
        .collect()
}

fn stratified(n: usize, d: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut points = vec![vec![0.0; d]; n];
    let nf = n as f64;
    for j in 0..d {
        let mut strata: Vec<usize> = (0..n).collect();
        strata.shuffle(&mut rng);
        for (point, stratum) in points.iter_mut().zip(strata) {
            let offset: f64 = rng.gen();
            point[j] = (stratum as f64 + offset) / nf;
        }
    }
    points
}

fn halton(n: usize, d: usize, seed: u64) -> CsResult<Vec<Vec<f64>>> {
    if d > PRIME_BASES.len() {
        return Err(CsError::UnsupportedDimension {
            dims: d,
            max: PRIME_BASES.len(),
        });
    }
    // Index 0 maps to the origin for every base; start at seed + 1.
    Ok((0..n as u64)
        .map(|i| {
            let index = seed.wrapping_add(i).wrapping_add(1);
            PRIME_BASES[..d]
                .iter()
                .map(|&base| radical_inverse(index, base))
                .collect()
        })
        .collect())
}

fn grid(n: usize, d: usize) -> Vec<Vec<f64>> {
    let steps = ((n as f64).powf(1.0 / d as f64).round() as usize).max(1);
    let levels: Vec<f64> = if steps == 1 {
        vec![0.0]
    } else {
        (0..steps)
            .map(|i| i as f64 / (steps - 1) as f64)
            .collect()
    };

    // Odometer over the mesh, last axis fastest.
    let mut cursor = vec![0usize; d];
    let mut points = Vec::with_capacity(n);
    while points.len() < n {
        points.push(cursor.iter().map(|&k| levels[k]).collect());
        let mut axis = d;
        loop {
            if axis == 0 {
                return points;
            }
            axis -= 1;
            cursor[axis] += 1;
            if cursor[axis] < steps {
                break;
            }
            cursor[axis] = 0;
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stratum(u: f64, n: usize) -> usize {
        ((u * n as f64).floor() as usize).min(n - 1)
    }

    #[test]
    fn radical_inverse_base_two() {
        assert_eq!(radical_inverse(1, 2), 0.5);
        assert_eq!(radical_inverse(2, 2), 0.25);
        assert_eq!(radical_inverse(3, 2), 0.75);
        assert_eq!(radical_inverse(1, 3), 1.0 / 3.0);
        assert_eq!(radical_inverse(0, 5), 0.0);
    }

    #[test]
    fn stratified_has_one_sample_per_stratum() {
        for d in 1..=4 {
            for &n in &[1usize, 7, 32] {
                let pts = Sampler::new(SamplingMethod::Stratified, 11).unit_points(n, d).unwrap();
                assert_eq!(pts.len(), n);
                for j in 0..d {
                    let mut hits = vec![0usize; n];
                    for p in &pts {
                        hits[stratum(p[j], n)] += 1;
                    }
                    assert!(hits.iter().all(|&h| h == 1), "d={d} n={n} axis={j}: {hits:?}");
                }
            }
        }
    }

    #[test]
    fn stratified_is_seed_deterministic() {
        let s = Sampler::new(SamplingMethod::Stratified, 42);
        assert_eq!(s.unit_points(20, 3).unwrap(), s.unit_points(20, 3).unwrap());
        let other = Sampler::new(SamplingMethod::Stratified, 43).unit_points(20, 3).unwrap();
        assert_ne!(s.unit_points(20, 3).unwrap(), other);
    }

    #[test]
    fn halton_seed_is_index_offset() {
        let base = Sampler::new(SamplingMethod::LowDiscrepancy, 0).unit_points(10, 2).unwrap();
        let shifted = Sampler::new(SamplingMethod::LowDiscrepancy, 3).unit_points(7, 2).unwrap();
        assert_eq!(&base[3..], &shifted[..]);
        assert_eq!(base[0], vec![0.5, 1.0 / 3.0]);
    }

    #[test]
    fn halton_rejects_too_many_dimensions() {
        let err = Sampler::new(SamplingMethod::LowDiscrepancy, 0)
            .unit_points(4, 13)
            .unwrap_err();
        assert!(matches!(err, CsError::UnsupportedDimension { dims: 13, max: 12 }));
    }

    #[test]
    fn grid_is_lexicographic_and_truncated() {
        let pts = Sampler::new(SamplingMethod::Grid, 0).unit_points(9, 2).unwrap();
        assert_eq!(pts.len(), 9);
        assert_eq!(pts[0], vec![0.0, 0.0]);
        assert_eq!(pts[1], vec![0.0, 0.5]);
        assert_eq!(pts[3], vec![0.5, 0.0]);
        assert_eq!(pts[8], vec![1.0, 1.0]);

        // round(sqrt(10)) = 3 steps per axis → 9 points only.
        assert_eq!(Sampler::new(SamplingMethod::Grid, 0).unit_points(10, 2).unwrap().len(), 9);
        // round(sqrt(7)) = 3 → 9 mesh points truncated to 7.
        assert_eq!(Sampler::new(SamplingMethod::Grid, 0).unit_points(7, 2).unwrap().len(), 7);
    }

    #[test]
    fn grid_single_point() {
        let pts = Sampler::new(SamplingMethod::Grid, 0).unit_points(1, 3).unwrap();
        assert_eq!(pts, vec![vec![0.0, 0.0, 0.0]]);
    }

    #[test]
    fn every_method_respects_bounds() {
        let vars = vec![
            Variable::new("a", -3.0, -1.0),
            Variable::new("b", 1e-3, 2e-3),
            Variable::new("c", 100.0, 250.0),
        ];
        for method in [
            SamplingMethod::Stratified,
            SamplingMethod::LowDiscrepancy,
            SamplingMethod::Grid,
        ] {
            let points = Sampler::new(method, 5).sample(&vars, 64).unwrap();
            assert!(!points.is_empty());
            for p in &points {
                for v in &vars {
                    let x = p[&v.name];
                    assert!(v.contains(x), "{method:?}: {} = {x} outside bounds", v.name);
                }
            }
        }
    }

    #[test]
    fn invalid_variables_are_rejected_before_mapping() {
        for method in [
            SamplingMethod::Stratified,
            SamplingMethod::LowDiscrepancy,
            SamplingMethod::Grid,
        ] {
            let err = Sampler::new(method, 0)
                .sample(&[Variable::new("x", 5.0, 1.0)], 4)
                .unwrap_err();
            assert!(matches!(err, CsError::InvalidBounds { .. }), "{method:?}: {err}");
        }

        let dup = [Variable::new("x", 0.0, 1.0), Variable::new("x", 0.0, 2.0)];
        let err = Sampler::new(SamplingMethod::Grid, 0).sample(&dup, 4).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn map_to_bounds_never_panics_on_inverted_bounds() {
        let point = map_to_bounds(&[0.5], &[Variable::new("x", 5.0, 1.0)]);
        assert_eq!(point["x"], 1.0);
    }

    #[test]
    fn zero_budget_is_config_error() {
        let err = Sampler::new(SamplingMethod::Grid, 0).unit_points(0, 2).unwrap_err();
        assert!(err.is_config());
    }
}
