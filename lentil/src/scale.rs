use crate::common::*;

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleParams {
    /// per-cell covariates to regress out: `n_counts`, `n_genes`,
    /// `percent_mito`, or any registered custom covariate
    pub regress_out: Vec<String>,
    /// clamp standardized values to `[-clip_max, clip_max]`
    pub clip_max: Option<f32>,
}

impl Default for ScaleParams {
    fn default() -> Self {
        Self {
            regress_out: vec![],
            clip_max: Some(10.0),
        }
    }
}

/// Regress covariates out of every column of `expr` and standardize
/// the residuals
///
/// * `expr` - cells x features
/// * `covariates` - cells x q (no intercept; one is added)
/// * `clip_max` - optional bound on the absolute standardized value
///
/// A column whose residual has no variance becomes all zero.
pub fn regress_and_scale(expr: &Mat, covariates: &Mat, clip_max: Option<f32>) -> Result<Mat> {
    let nn = expr.nrows();

    if covariates.nrows() != nn {
        return Err(PipelineError::Data(format!(
            "{} covariate rows for {} cells",
            covariates.nrows(),
            nn
        )));
    }
    if nn < 2 {
        return Err(PipelineError::Dimension(format!(
            "need at least two cells to scale, found {}",
            nn
        )));
    }

    let qq = covariates.ncols();
    let design = DMatrix::<f64>::from_fn(nn, qq + 1, |i, k| {
        if k == 0 {
            1.0
        } else {
            covariates[(i, k - 1)] as f64
        }
    });

    let pinv = design
        .clone()
        .pseudo_inverse(1e-10)
        .map_err(|e| PipelineError::Data(format!("covariate design: {}", e)))?;

    let columns: Vec<Vec<f32>> = (0..expr.ncols())
        .into_par_iter()
        .map(|g| {
            let y = nalgebra::DVector::<f64>::from_iterator(nn, expr.column(g).iter().map(|&x| x as f64));
            let resid = &y - &design * (&pinv * &y);
            standardize(resid.as_slice(), y.as_slice(), clip_max)
        })
        .collect();

    let mut ret = Mat::zeros(nn, expr.ncols());
    for (g, col) in columns.into_iter().enumerate() {
        ret.column_mut(g).copy_from_slice(&col);
    }

    info!(
        "scaled {} features over {} cells, {} covariate(s) regressed out",
        expr.ncols(),
        nn,
        qq
    );
    Ok(ret)
}

fn sample_variance(x: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

fn standardize(resid: &[f64], original: &[f64], clip_max: Option<f32>) -> Vec<f32> {
    let (_, var_y) = sample_variance(original);
    let (mean, var) = sample_variance(resid);

    // exactly constant input, or residual at round-off level
    if var_y <= 0.0 || var <= 1e-12 * var_y {
        return vec![0.0; resid.len()];
    }

    let sd = var.sqrt();
    resid
        .iter()
        .map(|r| {
            let z = ((r - mean) / sd) as f32;
            match clip_max {
                Some(c) => z.clamp(-c, c),
                None => z,
            }
        })
        .collect()
}
