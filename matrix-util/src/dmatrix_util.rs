use crate::traits::{MatOps, SampleOps};
use crate::utils::seeded_rng;
pub use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

impl MatOps for DMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn normalize_columns_inplace(&mut self) {
        for mut x_j in self.column_iter_mut() {
            let denom = x_j.norm();
            if denom > 0.0 {
                x_j /= denom;
            }
        }
    }

    fn normalize_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.normalize_columns_inplace();
        ret
    }

    fn scale_columns_inplace(&mut self) {
        for mut x_j in self.column_iter_mut() {
            let values: Vec<f32> = x_j.iter().copied().collect();
            let (mu, var) = mean_and_sample_variance(&values);
            if var > 0.0 {
                let sd = var.sqrt();
                x_j.iter_mut().for_each(|x| *x = (*x - mu) / sd);
            } else {
                x_j.fill(0.0);
            }
        }
    }

    fn scale_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.scale_columns_inplace();
        ret
    }

    fn centre_columns_inplace(&mut self) {
        let nn = self.nrows().max(1) as f32;
        for mut x_j in self.column_iter_mut() {
            let mu = x_j.sum() / nn;
            x_j.add_scalar_mut(-mu);
        }
    }

    fn centre_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.centre_columns_inplace();
        ret
    }
}

impl SampleOps for DMatrix<f32> {
    type Mat = Self;

    fn runif(dd: usize, nn: usize, seed: Option<u64>) -> Self::Mat {
        let mut rng = seeded_rng(seed);
        DMatrix::from_fn(dd, nn, |_, _| rng.random::<f32>())
    }

    fn rnorm(dd: usize, nn: usize, seed: Option<u64>) -> Self::Mat {
        let mut rng = seeded_rng(seed);
        DMatrix::from_fn(dd, nn, |_, _| rng.sample::<f32, _>(StandardNormal))
    }
}

/// Mean and sample variance (denominator `n - 1`), accumulated in `f64`
pub fn mean_and_sample_variance(values: &[f32]) -> (f32, f32) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mu = values.iter().map(|&x| x as f64).sum::<f64>() / n as f64;
    if n < 2 {
        return (mu as f32, 0.0);
    }
    let ss = values.iter().map(|&x| (x as f64 - mu).powi(2)).sum::<f64>();
    (mu as f32, (ss / (n - 1) as f64) as f32)
}

/// Pearson correlation between two columns of equal length
pub fn pearson_correlation(x: &[f32], y: &[f32]) -> f32 {
    debug_assert_eq!(x.len(), y.len());
    let n = x.len();
    if n < 2 {
        return 0.0;
    }
    let mx = x.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let my = y.iter().map(|&v| v as f64).sum::<f64>() / n as f64;

    let (mut sxy, mut sxx, mut syy) = (0f64, 0f64, 0f64);
    for (&a, &b) in x.iter().zip(y.iter()) {
        let (da, db) = (a as f64 - mx, b as f64 - my);
        sxy += da * db;
        sxx += da * da;
        syy += db * db;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return 0.0;
    }
    (sxy / (sxx * syy).sqrt()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_scale_columns_zero_variance() {
        let mut xx = DMatrix::from_row_slice(3, 2, &[1.0, 5.0, 2.0, 5.0, 3.0, 5.0]);
        xx.scale_columns_inplace();

        assert_abs_diff_eq!(xx[(0, 0)], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(xx[(1, 0)], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(xx[(2, 0)], 1.0, epsilon = 1e-6);
        assert!(xx.column(1).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_mean_and_sample_variance() {
        let (mu, var) = mean_and_sample_variance(&[1.0, 2.0, 3.0, 6.0]);
        assert_abs_diff_eq!(mu, 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(var, 14.0 / 3.0, epsilon = 1e-5);
        assert_eq!(mean_and_sample_variance(&[7.0]), (7.0, 0.0));
        assert_eq!(mean_and_sample_variance(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_normalize_columns() {
        let mut xx = DMatrix::<f32>::runif(100, 10, Some(1));
        xx.normalize_columns_inplace();
        for j in 0..xx.ncols() {
            assert_abs_diff_eq!(xx.column(j).norm(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let a = DMatrix::<f32>::rnorm(5, 4, Some(42));
        let b = DMatrix::<f32>::rnorm(5, 4, Some(42));
        let c = DMatrix::<f32>::rnorm(5, 4, Some(43));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_pearson_correlation() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        let z = [4.0, 3.0, 2.0, 1.0];
        assert_abs_diff_eq!(pearson_correlation(&x, &y), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(pearson_correlation(&x, &z), -1.0, epsilon = 1e-6);
        assert_eq!(pearson_correlation(&x, &[1.0, 1.0, 1.0, 1.0]), 0.0);
    }
}
