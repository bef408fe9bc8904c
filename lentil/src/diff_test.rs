//! Two-sample tests of one gene's normalized expression

use serde::{Deserialize, Serialize};
use special::Error as ErrorFunction;
use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TestOutcome {
    pub statistic: f64,
    pub p_value: f64,
}

impl TestOutcome {
    fn null() -> Self {
        Self {
            statistic: 0.0,
            p_value: 1.0,
        }
    }
}

/// A two-sample test comparing values of a target group `a` with a
/// comparison group `b`
pub trait DifferentialTest: Sync {
    fn name(&self) -> &'static str;
    fn test(&self, a: &[f32], b: &[f32]) -> TestOutcome;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeTest {
    /// Wilcoxon rank-sum test
    RankSum,
    /// Welch's two-sample t-test
    TTest,
    /// likelihood-ratio test of a zero-inflated normal model
    Bimod,
}

impl DeTest {
    pub fn tester(&self) -> Box<dyn DifferentialTest> {
        match self {
            DeTest::RankSum => Box::new(RankSumTest),
            DeTest::TTest => Box::new(WelchTTest),
            DeTest::Bimod => Box::new(BimodLrt),
        }
    }
}

/// Wilcoxon rank-sum test with the normal approximation, tie-corrected
/// variance and continuity correction. The statistic is `W`, the rank
/// sum of `a` minus its minimum.
pub struct RankSumTest;

impl DifferentialTest for RankSumTest {
    fn name(&self) -> &'static str {
        "wilcoxon"
    }

    fn test(&self, a: &[f32], b: &[f32]) -> TestOutcome {
        let n1 = a.len() as f64;
        let n2 = b.len() as f64;
        if a.is_empty() || b.is_empty() {
            return TestOutcome::null();
        }

        let mut pooled: Vec<(f32, bool)> = a
            .iter()
            .map(|&x| (x, true))
            .chain(b.iter().map(|&x| (x, false)))
            .collect();
        pooled.sort_by(|x, y| x.0.total_cmp(&y.0));

        let nn = pooled.len();
        let mut rank_sum_a = 0.0;
        let mut tie_term = 0.0;
        let mut start = 0;
        while start < nn {
            let mut end = start + 1;
            while end < nn && pooled[end].0 == pooled[start].0 {
                end += 1;
            }
            // ranks start + 1 ..= end
            let avg_rank = (start + 1 + end) as f64 / 2.0;
            let in_a = pooled[start..end].iter().filter(|&&(_, is_a)| is_a).count();
            rank_sum_a += avg_rank * in_a as f64;
            let t = (end - start) as f64;
            tie_term += t * t * t - t;
            start = end;
        }

        let w = rank_sum_a - n1 * (n1 + 1.0) / 2.0;
        let mu = n1 * n2 / 2.0;
        let n = n1 + n2;
        let var = n1 * n2 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));

        if var <= 0.0 {
            return TestOutcome {
                statistic: w,
                p_value: 1.0,
            };
        }

        let diff = w - mu;
        let correction = if diff == 0.0 { 0.0 } else { 0.5 * diff.signum() };
        let z = (diff - correction) / var.sqrt();

        TestOutcome {
            statistic: w,
            p_value: two_sided_normal(z),
        }
    }
}

/// Welch's unequal-variance t-test
pub struct WelchTTest;

impl DifferentialTest for WelchTTest {
    fn name(&self) -> &'static str {
        "t"
    }

    fn test(&self, a: &[f32], b: &[f32]) -> TestOutcome {
        if a.len() < 2 || b.len() < 2 {
            return TestOutcome::null();
        }

        let (m1, v1) = mean_var(a);
        let (m2, v2) = mean_var(b);
        let n1 = a.len() as f64;
        let n2 = b.len() as f64;

        let se2 = v1 / n1 + v2 / n2;
        if se2 <= 0.0 {
            return if m1 == m2 {
                TestOutcome::null()
            } else {
                TestOutcome {
                    statistic: if m1 > m2 {
                        f64::INFINITY
                    } else {
                        f64::NEG_INFINITY
                    },
                    p_value: 0.0,
                }
            };
        }

        let t = (m1 - m2) / se2.sqrt();
        let df = se2 * se2
            / ((v1 / n1).powi(2) / (n1 - 1.0) + (v2 / n2).powi(2) / (n2 - 1.0));

        let p_value = match StudentsT::new(0.0, 1.0, df) {
            Ok(dist) => (2.0 * dist.sf(t.abs())).min(1.0),
            Err(_) => two_sided_normal(t),
        };

        TestOutcome {
            statistic: t,
            p_value,
        }
    }
}

/// Likelihood-ratio test of a mixture of a point mass at zero and a
/// normal on the positive values (McDavid et al. 2013), three degrees
/// of freedom
pub struct BimodLrt;

impl DifferentialTest for BimodLrt {
    fn name(&self) -> &'static str {
        "bimod"
    }

    fn test(&self, a: &[f32], b: &[f32]) -> TestOutcome {
        if a.is_empty() || b.is_empty() {
            return TestOutcome::null();
        }

        let pooled: Vec<f32> = a.iter().chain(b.iter()).copied().collect();
        let lrt = (2.0 * (bimod_loglik(a) + bimod_loglik(b) - bimod_loglik(&pooled))).max(0.0);

        let p_value = match ChiSquared::new(3.0) {
            Ok(dist) => dist.sf(lrt),
            Err(_) => 1.0,
        };

        TestOutcome {
            statistic: lrt,
            p_value,
        }
    }
}

fn bimod_loglik(x: &[f32]) -> f64 {
    let positive: Vec<f64> = x.iter().filter(|&&v| v > 0.0).map(|&v| v as f64).collect();
    let n_zero = (x.len() - positive.len()) as f64;
    let n_pos = positive.len() as f64;

    let frac = (n_pos / x.len() as f64).clamp(1e-5, 1.0 - 1e-5);
    let lik_zero = n_zero * (1.0 - frac).ln();

    if positive.is_empty() {
        return lik_zero;
    }

    let mean = positive.iter().sum::<f64>() / n_pos;
    let sd = if positive.len() < 2 {
        1.0
    } else {
        let var = positive.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n_pos - 1.0);
        var.sqrt().max(1e-6)
    };

    let log_norm = -0.5 * (2.0 * std::f64::consts::PI).ln() - sd.ln();
    let lik_pos: f64 = positive
        .iter()
        .map(|v| log_norm - 0.5 * ((v - mean) / sd).powi(2))
        .sum();

    lik_zero + n_pos * frac.ln() + lik_pos
}

fn mean_var(x: &[f32]) -> (f64, f64) {
    let n = x.len() as f64;
    let mean = x.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = x.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

/// `P(|Z| >= |z|)` for a standard normal `Z`
fn two_sided_normal(z: f64) -> f64 {
    (z.abs() / std::f64::consts::SQRT_2).compl_error().min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rank_sum_by_hand() {
        // ranks of a: 2, 4, 6; W = 12 - 6
        let out = RankSumTest.test(&[2.0, 4.0, 6.0], &[1.0, 3.0, 5.0]);
        assert_abs_diff_eq!(out.statistic, 6.0, epsilon = 1e-12);

        let out = RankSumTest.test(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]);
        assert_abs_diff_eq!(out.statistic, 0.0, epsilon = 1e-12);
        // z = (0 - 4.5 + 0.5) / sqrt(5.25)
        let z: f64 = -4.0 / 5.25f64.sqrt();
        assert_abs_diff_eq!(out.p_value, two_sided_normal(z), epsilon = 1e-12);
        assert!(out.p_value > 0.05 && out.p_value < 0.1);
    }

    #[test]
    fn test_rank_sum_all_tied() {
        let out = RankSumTest.test(&[0.0; 4], &[0.0; 5]);
        assert_eq!(out.p_value, 1.0);
    }

    #[test]
    fn test_rank_sum_strong_separation() {
        let a = vec![3.0f32; 100];
        let b = vec![0.0f32; 100];
        let out = RankSumTest.test(&a, &b);
        assert_eq!(out.statistic, 10000.0);
        assert!(out.p_value < 1e-30);
    }

    #[test]
    fn test_welch_t() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0, 10.0];
        let out = WelchTTest.test(&a, &b);
        // means 2.5 and 6, variances 5/3 and 10
        let se = (5.0f64 / 3.0 / 4.0 + 10.0 / 5.0).sqrt();
        assert_abs_diff_eq!(out.statistic, -3.5 / se, epsilon = 1e-9);
        assert!(out.p_value > 0.05 && out.p_value < 0.1);

        let same = WelchTTest.test(&[1.0, 1.0], &[1.0, 1.0, 1.0]);
        assert_eq!(same.p_value, 1.0);
        let apart = WelchTTest.test(&[2.0, 2.0], &[1.0, 1.0, 1.0]);
        assert_eq!(apart.p_value, 0.0);
    }

    #[test]
    fn test_bimod() {
        let a: Vec<f32> = (0..50).map(|i| if i % 5 == 0 { 0.0 } else { 2.0 + (i % 3) as f32 * 0.1 }).collect();
        let b: Vec<f32> = (0..50).map(|i| if i % 5 == 0 { 0.3 } else { 0.0 }).collect();
        let out = BimodLrt.test(&a, &b);
        assert!(out.statistic > 0.0);
        assert!(out.p_value < 1e-6);

        let null = BimodLrt.test(&a, &a);
        assert_abs_diff_eq!(null.statistic, 0.0, epsilon = 1e-6);
        assert!(null.p_value > 0.99);
    }

    #[test]
    fn test_selector() {
        assert_eq!(DeTest::RankSum.tester().name(), "wilcoxon");
        assert_eq!(DeTest::TTest.tester().name(), "t");
        assert_eq!(DeTest::Bimod.tester().name(), "bimod");
    }
}
