use crate::common::*;

use matrix_util::utils::median;
use serde::{Deserialize, Serialize};

/// Target total count of every cell after rescaling
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScaleFactor {
    Fixed(f32),
    /// median total count of the cells being normalized
    MedianTotal,
}

impl Default for ScaleFactor {
    fn default() -> Self {
        ScaleFactor::Fixed(1e4)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeParams {
    pub scale_factor: ScaleFactor,
}

/// Log-normalize counts cell by cell
///
/// ```text
/// x'(g,j) = ln(1 + y(g,j) / total(j) * scale_factor)
/// ```
///
/// * `counts` - genes x cells
/// * `scale_factor` - fixed or the median of the cell totals
///
/// Returns the normalized matrix (same sparsity pattern) and the scale
/// factor actually used.
pub fn log_normalize(counts: &CscMat, scale_factor: ScaleFactor) -> Result<(CscMat, f32)> {
    let totals: Vec<f32> = (0..counts.ncols())
        .map(|j| counts.col(j).values().iter().sum())
        .collect();

    if let Some(j) = totals.iter().position(|&t| t <= 0.0) {
        return Err(PipelineError::Data(format!(
            "cell {} has no counts; filter it out before normalization",
            j
        )));
    }

    let sf = match scale_factor {
        ScaleFactor::Fixed(sf) => sf,
        ScaleFactor::MedianTotal => median(&totals).unwrap_or(0.0),
    };

    if !(sf.is_finite() && sf > 0.0) {
        return Err(PipelineError::Data(format!("invalid scale factor {}", sf)));
    }

    let mut normalized = counts.clone();
    for (j, mut col) in normalized.col_iter_mut().enumerate() {
        let denom = totals[j] as f64;
        col.values_mut()
            .iter_mut()
            .for_each(|x| *x = ((*x as f64) / denom * sf as f64).ln_1p() as f32);
    }

    info!(
        "log-normalized {} cells with scale factor {}",
        counts.ncols(),
        sf
    );

    Ok((normalized, sf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn toy_counts(cells: &[[f32; 4]]) -> CscMat {
        let cells: Vec<Vec<f32>> = cells.iter().map(|c| c.to_vec()).collect();
        let genes: Vec<Box<str>> = (0..4).map(|i| format!("g{}", i).into()).collect();
        let barcodes: Vec<Box<str>> = (0..cells.len()).map(|j| format!("c{}", j).into()).collect();
        CountMatrix::from_cells(&cells, genes, barcodes)
            .unwrap()
            .counts
    }

    fn dense(x: &CscMat) -> Mat {
        let mut ret = Mat::zeros(x.nrows(), x.ncols());
        for (i, j, &v) in x.triplet_iter() {
            ret[(i, j)] = v;
        }
        ret
    }

    #[test]
    fn test_doubling_a_cell_keeps_its_profile() -> anyhow::Result<()> {
        let counts = toy_counts(&[[1.0, 2.0, 0.0, 5.0], [3.0, 0.0, 1.0, 1.0], [4.0, 4.0, 2.0, 0.0]]);
        let doubled = toy_counts(&[[2.0, 4.0, 0.0, 10.0], [3.0, 0.0, 1.0, 1.0], [4.0, 4.0, 2.0, 0.0]]);

        let (x, _) = log_normalize(&counts, ScaleFactor::Fixed(1e4))?;
        let (y, _) = log_normalize(&doubled, ScaleFactor::Fixed(1e4))?;

        assert_abs_diff_eq!(dense(&x), dense(&y), epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_values_by_hand() -> anyhow::Result<()> {
        let counts = toy_counts(&[[1.0, 1.0, 2.0, 0.0], [0.0, 0.0, 0.0, 8.0]]);

        let (x, sf) = log_normalize(&counts, ScaleFactor::MedianTotal)?;
        assert_eq!(sf, 6.0);

        let x = dense(&x);
        assert_abs_diff_eq!(x[(0, 0)], (1.0f32 + 1.5).ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(x[(2, 0)], (1.0f32 + 3.0).ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(x[(3, 1)], (1.0f32 + 6.0).ln(), epsilon = 1e-6);
        assert!(x.iter().all(|v| v.is_finite() && *v >= 0.0));
        Ok(())
    }

    #[test]
    fn test_zero_total_cell() {
        let counts = toy_counts(&[[1.0, 1.0, 2.0, 0.0], [0.0, 0.0, 0.0, 0.0]]);
        assert!(matches!(
            log_normalize(&counts, ScaleFactor::default()),
            Err(PipelineError::Data(_))
        ));
    }
}
