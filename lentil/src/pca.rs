use crate::common::*;

use matrix_util::dmatrix_rsvd::RandomizedSVD;
use matrix_util::traits::MatOps;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PcaSolver {
    /// full singular value decomposition
    Exact,
    /// Halko et al. randomized SVD with power iterations
    Randomized { iter: usize, seed: Option<u64> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaParams {
    pub n_components: usize,
    pub solver: PcaSolver,
}

impl Default for PcaParams {
    fn default() -> Self {
        Self {
            n_components: 20,
            solver: PcaSolver::Exact,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PcaResult {
    /// cells x K
    pub scores: Mat,
    /// features x K, orthonormal columns
    pub loadings: Mat,
    /// fraction of the total variance per component, descending
    pub variance_explained: Vec<f32>,
    /// standard deviation of the scores per component
    pub stdev: Vec<f32>,
}

impl PcaResult {
    pub fn n_components(&self) -> usize {
        self.scores.ncols()
    }
}

/// Principal components of the scaled data (cells x features)
///
/// The number of components must lie in `1..=min(cells, features) - 1`.
/// Each component's largest loading in absolute value is positive.
pub fn run_pca(scaled: &Mat, n_components: usize, solver: PcaSolver) -> Result<PcaResult> {
    let (nn, pp) = scaled.shape();
    let max_k = nn.min(pp).saturating_sub(1);

    if n_components < 1 || n_components > max_k {
        return Err(PipelineError::Dimension(format!(
            "{} components requested for {} cells x {} features (at most {})",
            n_components, nn, pp, max_k
        )));
    }

    let xx = scaled.centre_columns();
    let total_ss: f64 = xx.iter().map(|&x| (x as f64) * (x as f64)).sum();

    let (uu, dd, vv) = match solver {
        PcaSolver::Exact => exact_svd(&xx, n_components)?,
        PcaSolver::Randomized { iter, seed } => {
            warn_if_unseeded("randomized PCA", seed);
            let seed = seed.unwrap_or_else(rand::random);
            let mut rsvd = RandomizedSVD::new(n_components, iter).with_seed(seed);
            rsvd.compute(&xx)?;
            (
                rsvd.matrix_u().clone(),
                rsvd.singular_values().iter().copied().collect(),
                rsvd.matrix_v().clone(),
            )
        }
    };

    let kk = dd.len().min(n_components);
    let mut scores = Mat::zeros(nn, kk);
    let mut loadings = Mat::zeros(pp, kk);

    for k in 0..kk {
        let v_k = vv.column(k);
        let pivot = v_k.iamax();
        let sign = if v_k[pivot] < 0.0 { -1.0 } else { 1.0 };
        loadings.column_mut(k).copy_from(&(v_k * sign));
        scores.column_mut(k).copy_from(&(uu.column(k) * (sign * dd[k])));
    }

    let variance_explained: Vec<f32> = dd
        .iter()
        .take(kk)
        .map(|&d| {
            if total_ss > 0.0 {
                ((d as f64).powi(2) / total_ss) as f32
            } else {
                0.0
            }
        })
        .collect();

    let stdev: Vec<f32> = dd
        .iter()
        .take(kk)
        .map(|&d| d / ((nn - 1) as f32).sqrt())
        .collect();

    info!(
        "PCA: {} components of {} cells x {} features, {:.1}% of variance",
        kk,
        nn,
        pp,
        100.0 * variance_explained.iter().sum::<f32>()
    );

    Ok(PcaResult {
        scores,
        loadings,
        variance_explained,
        stdev,
    })
}

fn exact_svd(xx: &Mat, kk: usize) -> Result<(Mat, Vec<f32>, Mat)> {
    let svd = xx.clone().svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(PipelineError::Data("SVD did not converge".into()));
    };

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));
    order.truncate(kk);

    let uu = Mat::from_fn(u.nrows(), order.len(), |i, k| u[(i, order[k])]);
    let vv = Mat::from_fn(v_t.ncols(), order.len(), |j, k| v_t[(order[k], j)]);
    let dd = order.iter().map(|&k| svd.singular_values[k]).collect();
    Ok((uu, dd, vv))
}
