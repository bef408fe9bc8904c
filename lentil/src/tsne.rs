use crate::common::*;

use indicatif::ProgressIterator;
use matrix_util::utils::seeded_rng;
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const ENTROPY_TOL: f64 = 1e-5;
const MAX_BISECTION: usize = 100;
const MIN_PROB: f64 = 1e-12;
const MIN_GAIN: f64 = 0.01;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TsneParams {
    /// number of leading principal components
    pub dims: usize,
    pub perplexity: f32,
    pub learning_rate: f32,
    /// momentum during early exaggeration
    pub initial_momentum: f32,
    pub momentum: f32,
    pub n_iter: usize,
    pub early_exaggeration: f32,
    pub early_exaggeration_iter: usize,
    pub seed: Option<u64>,
    /// refuse to embed more cells than this; the exact method keeps two
    /// dense cells x cells `f64` matrices (about 1.6 GB at 10,000 cells)
    pub max_cells: usize,
}

impl Default for TsneParams {
    fn default() -> Self {
        Self {
            dims: 10,
            perplexity: 30.0,
            learning_rate: 200.0,
            initial_momentum: 0.5,
            momentum: 0.8,
            n_iter: 1000,
            early_exaggeration: 4.0,
            early_exaggeration_iter: 250,
            seed: Some(42),
            max_cells: 10_000,
        }
    }
}

/// Exact t-SNE of the first `dims` columns of the PCA scores
///
/// Returns a cells x 2 embedding. Fails with a dimension error unless
/// `3 * perplexity <= cells - 1` and `cells <= max_cells`.
///
/// Time and memory grow with `cells²`: the joint probabilities and the
/// gradient kernel are both dense `cells x cells` matrices.
pub fn run_tsne(scores: &Mat, params: &TsneParams) -> Result<Mat> {
    let (nn, kk) = scores.shape();

    if params.dims < 1 || params.dims > kk {
        return Err(PipelineError::Dimension(format!(
            "{} dimensions requested, {} principal components available",
            params.dims, kk
        )));
    }
    if !(params.perplexity.is_finite() && params.perplexity > 0.0) {
        return Err(PipelineError::Data(format!(
            "invalid perplexity {}",
            params.perplexity
        )));
    }
    if nn > params.max_cells {
        return Err(PipelineError::Dimension(format!(
            "exact t-SNE of {} cells exceeds the limit of {} (raise max_cells or skip t-SNE)",
            nn, params.max_cells
        )));
    }
    if nn < 2 || 3.0 * params.perplexity > (nn - 1) as f32 {
        return Err(PipelineError::Dimension(format!(
            "perplexity {} is too large for {} cells",
            params.perplexity, nn
        )));
    }

    let xx: Vec<Vec<f64>> = (0..nn)
        .map(|i| (0..params.dims).map(|k| scores[(i, k)] as f64).collect())
        .collect();

    let pp = joint_probabilities(&xx, params.perplexity as f64);

    warn_if_unseeded("t-SNE", params.seed);
    let mut rng = seeded_rng(params.seed);
    let mut yy: Vec<[f64; 2]> = (0..nn)
        .map(|_| {
            let a: f64 = rng.sample(StandardNormal);
            let b: f64 = rng.sample(StandardNormal);
            [1e-4 * a, 1e-4 * b]
        })
        .collect();

    let mut update = vec![[0.0f64; 2]; nn];
    let mut gains = vec![[1.0f64; 2]; nn];
    let lr = params.learning_rate as f64;

    info!(
        "t-SNE: {} cells on {} PCs, perplexity {}, {} iterations",
        nn, params.dims, params.perplexity, params.n_iter
    );

    for iter in (0..params.n_iter).progress_count(params.n_iter as u64) {
        let early = iter < params.early_exaggeration_iter;
        let exaggeration = if early {
            params.early_exaggeration as f64
        } else {
            1.0
        };
        let momentum = if early {
            params.initial_momentum as f64
        } else {
            params.momentum as f64
        };

        let grad = gradient(&pp, &yy, exaggeration);

        for i in 0..nn {
            for d in 0..2 {
                let g = grad[i][d];
                let gain = if (g > 0.0) != (update[i][d] > 0.0) {
                    gains[i][d] + 0.2
                } else {
                    gains[i][d] * 0.8
                };
                gains[i][d] = gain.max(MIN_GAIN);
                update[i][d] = momentum * update[i][d] - lr * gains[i][d] * g;
                yy[i][d] += update[i][d];
            }
        }
        recentre(&mut yy);

        if (iter + 1) % 250 == 0 {
            log::debug!(
                "t-SNE iteration {}: KL = {:.4}",
                iter + 1,
                kl_divergence(&pp, &yy)
            );
        }
    }

    info!("t-SNE done, KL = {:.4}", kl_divergence(&pp, &yy));

    Ok(Mat::from_fn(nn, 2, |i, d| yy[i][d] as f32))
}

/// Symmetric affinities `P = (P_j|i + P_i|j) / 2n` as a dense row-major
/// n x n vector
fn joint_probabilities(xx: &[Vec<f64>], perplexity: f64) -> Vec<f64> {
    let nn = xx.len();
    let target = perplexity.ln();

    let conditional: Vec<Vec<f64>> = (0..nn)
        .into_par_iter()
        .map(|i| {
            let dist: Vec<f64> = xx
                .iter()
                .map(|x_j| {
                    x_j.iter()
                        .zip(xx[i].iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum()
                })
                .collect();
            conditional_row(&dist, i, target)
        })
        .collect();

    let denom = 2.0 * nn as f64;
    let mut pp = vec![0.0; nn * nn];
    for i in 0..nn {
        for j in 0..nn {
            if i != j {
                pp[i * nn + j] = ((conditional[i][j] + conditional[j][i]) / denom).max(MIN_PROB);
            }
        }
    }
    pp
}

/// `P_j|i` with the Gaussian precision tuned by bisection so that the
/// entropy matches `ln(perplexity)`
fn conditional_row(dist: &[f64], i: usize, target: f64) -> Vec<f64> {
    let d_min = dist
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != i)
        .map(|(_, &d)| d)
        .fold(f64::INFINITY, f64::min);

    let mut beta = 1.0;
    let mut lo = f64::NEG_INFINITY;
    let mut hi = f64::INFINITY;
    let mut row = vec![0.0; dist.len()];

    for _ in 0..MAX_BISECTION {
        let mut sum = 0.0;
        let mut weighted = 0.0;
        for (j, &d) in dist.iter().enumerate() {
            row[j] = if j == i {
                0.0
            } else {
                (-(d - d_min) * beta).exp()
            };
            sum += row[j];
            weighted += (d - d_min) * row[j];
        }
        let entropy = sum.ln() + beta * weighted / sum;
        row.iter_mut().for_each(|p| *p /= sum);

        let diff = entropy - target;
        if diff.abs() < ENTROPY_TOL {
            break;
        }
        if diff > 0.0 {
            lo = beta;
            beta = if hi.is_finite() {
                (beta + hi) / 2.0
            } else {
                beta * 2.0
            };
        } else {
            hi = beta;
            beta = if lo.is_finite() {
                (beta + lo) / 2.0
            } else {
                beta / 2.0
            };
        }
    }
    row
}

/// `dC/dy_i = 4 Σ_j (αP_ij - Q_ij) (1 + |y_i - y_j|²)^-1 (y_i - y_j)`
fn gradient(pp: &[f64], yy: &[[f64; 2]], exaggeration: f64) -> Vec<[f64; 2]> {
    let nn = yy.len();

    let kernel: Vec<Vec<f64>> = (0..nn)
        .into_par_iter()
        .map(|i| {
            (0..nn)
                .map(|j| {
                    if i == j {
                        0.0
                    } else {
                        let dx = yy[i][0] - yy[j][0];
                        let dy = yy[i][1] - yy[j][1];
                        1.0 / (1.0 + dx * dx + dy * dy)
                    }
                })
                .collect()
        })
        .collect();

    let z: f64 = kernel.iter().map(|r| r.iter().sum::<f64>()).sum();

    (0..nn)
        .into_par_iter()
        .map(|i| {
            let mut g = [0.0; 2];
            for j in 0..nn {
                if i == j {
                    continue;
                }
                let w = kernel[i][j];
                let coef = (exaggeration * pp[i * nn + j] - w / z) * w;
                g[0] += coef * (yy[i][0] - yy[j][0]);
                g[1] += coef * (yy[i][1] - yy[j][1]);
            }
            [4.0 * g[0], 4.0 * g[1]]
        })
        .collect()
}

fn recentre(yy: &mut [[f64; 2]]) {
    let nn = yy.len() as f64;
    let mean = yy
        .iter()
        .fold([0.0; 2], |acc, y| [acc[0] + y[0] / nn, acc[1] + y[1] / nn]);
    yy.iter_mut().for_each(|y| {
        y[0] -= mean[0];
        y[1] -= mean[1];
    });
}

fn kl_divergence(pp: &[f64], yy: &[[f64; 2]]) -> f64 {
    let nn = yy.len();
    let mut z = 0.0;
    for i in 0..nn {
        for j in 0..nn {
            if i != j {
                let dx = yy[i][0] - yy[j][0];
                let dy = yy[i][1] - yy[j][1];
                z += 1.0 / (1.0 + dx * dx + dy * dy);
            }
        }
    }
    let mut kl = 0.0;
    for i in 0..nn {
        for j in 0..nn {
            if i != j {
                let dx = yy[i][0] - yy[j][0];
                let dy = yy[i][1] - yy[j][1];
                let q = (1.0 / (1.0 + dx * dx + dy * dy) / z).max(MIN_PROB);
                let p = pp[i * nn + j];
                kl += p * (p / q).ln();
            }
        }
    }
    kl
}
