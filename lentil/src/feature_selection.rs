use crate::common::*;

use serde::{Deserialize, Serialize};

/// How to score gene variability
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum HvgMethod {
    /// Dispersion `ln(var/mean)` z-scored within bins of genes of
    /// similar mean expression
    MeanVarPlot {
        n_bins: usize,
        min_mean: f32,
        max_mean: f32,
        min_dispersion: f32,
    },
    /// Excess coefficient of variation over a Poisson-Gamma null model
    PoissonGammaCv {
        min_mean: f32,
        max_mean: f32,
        n_sd: f32,
    },
}

impl Default for HvgMethod {
    fn default() -> Self {
        HvgMethod::MeanVarPlot {
            n_bins: 20,
            min_mean: 0.0125,
            max_mean: 3.0,
            min_dispersion: 0.5,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSelectionParams {
    pub method: HvgMethod,
    /// keep at most this many of the best scoring genes
    pub max_features: Option<usize>,
}

/// Variability statistics of one gene
#[derive(Clone, Copy, Debug)]
pub struct GeneStat {
    /// `ln(1 + mean)` of the expression on the count scale
    pub mean: f32,
    /// `ln(var/mean)` or the coefficient of variation, by method
    pub dispersion: f32,
    /// standardized dispersion or excess, `NaN` if not defined
    pub score: f32,
}

/// Parameters of the fitted `CV^2 = 1/mean + 1/shape` null model
#[derive(Clone, Copy, Debug)]
pub struct NullModel {
    pub shape: f32,
    pub rate: f32,
}

#[derive(Clone, Debug)]
pub struct FeatureSelection {
    /// selected gene indices, ascending
    pub genes: Vec<usize>,
    /// statistics of every gene
    pub stats: Vec<GeneStat>,
    pub null_model: Option<NullModel>,
}

impl FeatureSelection {
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }
}

/// Mean and sample variance of `expm1(x)` for every gene (row) of
/// log-normalized data
pub fn gene_moments(normalized: &CscMat) -> Vec<(f64, f64)> {
    let nn = normalized.ncols() as f64;
    let dd = normalized.nrows();

    let mut s1 = vec![0f64; dd];
    let mut s2 = vec![0f64; dd];
    for (g, _, &x) in normalized.triplet_iter() {
        let y = (x as f64).exp_m1();
        s1[g] += y;
        s2[g] += y * y;
    }

    s1.into_iter()
        .zip(s2)
        .map(|(s1, s2)| {
            let mu = s1 / nn.max(1.0);
            let var = if nn > 1.0 {
                ((s2 - nn * mu * mu) / (nn - 1.0)).max(0.0)
            } else {
                0.0
            };
            // round-off of a constant gene
            let var = if var <= 1e-10 * mu * mu { 0.0 } else { var };
            (mu, var)
        })
        .collect()
}

/// Select highly variable genes from log-normalized genes x cells data
pub fn select_variable_features(
    normalized: &CscMat,
    params: &FeatureSelectionParams,
) -> Result<FeatureSelection> {
    let moments = gene_moments(normalized);

    let (stats, candidates, null_model) = match params.method {
        HvgMethod::MeanVarPlot {
            n_bins,
            min_mean,
            max_mean,
            min_dispersion,
        } => {
            if n_bins == 0 {
                return Err(PipelineError::Data("need at least one bin".into()));
            }
            let stats = mean_var_plot(&moments, n_bins);
            let candidates: Vec<usize> = stats
                .iter()
                .enumerate()
                .filter(|(_, s)| {
                    s.dispersion.is_finite()
                        && s.mean >= min_mean
                        && s.mean <= max_mean
                        && s.score > min_dispersion
                })
                .map(|(g, _)| g)
                .collect();
            (stats, candidates, None)
        }
        HvgMethod::PoissonGammaCv {
            min_mean,
            max_mean,
            n_sd,
        } => {
            let (stats, null_model) = poisson_gamma_cv(&moments, min_mean, max_mean);
            let candidates: Vec<usize> = stats
                .iter()
                .enumerate()
                .filter(|(_, s)| s.score.is_finite() && s.score > n_sd)
                .map(|(g, _)| g)
                .collect();
            (stats, candidates, null_model)
        }
    };

    let mut genes = candidates;

    if let Some(max_features) = params.max_features {
        if genes.len() > max_features {
            genes.sort_by(|&a, &b| stats[b].score.total_cmp(&stats[a].score).then(a.cmp(&b)));
            genes.truncate(max_features);
        }
    }

    genes.sort_unstable();
    genes.dedup();

    if genes.is_empty() {
        warn!("no variable genes selected out of {}", stats.len());
    } else {
        info!("selected {} variable genes out of {}", genes.len(), stats.len());
    }

    Ok(FeatureSelection {
        genes,
        stats,
        null_model,
    })
}

fn mean_var_plot(moments: &[(f64, f64)], n_bins: usize) -> Vec<GeneStat> {
    let mut stats: Vec<GeneStat> = moments
        .iter()
        .map(|&(mu, var)| GeneStat {
            mean: mu.ln_1p() as f32,
            dispersion: (var / mu).ln() as f32,
            score: f32::NAN,
        })
        .collect();

    // quantile bins over genes with a defined dispersion
    let mut ranked: Vec<usize> = (0..stats.len())
        .filter(|&g| stats[g].dispersion.is_finite())
        .collect();
    ranked.sort_by(|&a, &b| stats[a].mean.total_cmp(&stats[b].mean).then(a.cmp(&b)));

    let ntot = ranked.len();
    let mut bins: Vec<Vec<usize>> = vec![vec![]; n_bins];
    for (r, &g) in ranked.iter().enumerate() {
        bins[(r * n_bins / ntot.max(1)).min(n_bins - 1)].push(g);
    }

    for bin in bins.iter().filter(|b| !b.is_empty()) {
        let n = bin.len();
        let mean = bin.iter().map(|&g| stats[g].dispersion as f64).sum::<f64>() / n as f64;
        let sd = if n > 1 {
            (bin.iter()
                .map(|&g| (stats[g].dispersion as f64 - mean).powi(2))
                .sum::<f64>()
                / (n - 1) as f64)
                .sqrt()
        } else {
            0.0
        };
        for &g in bin {
            stats[g].score = if sd > 0.0 {
                ((stats[g].dispersion as f64 - mean) / sd) as f32
            } else {
                0.0
            };
        }
    }

    stats
}

fn poisson_gamma_cv(
    moments: &[(f64, f64)],
    min_mean: f32,
    max_mean: f32,
) -> (Vec<GeneStat>, Option<NullModel>) {
    let mut stats: Vec<GeneStat> = moments
        .iter()
        .map(|&(mu, var)| GeneStat {
            mean: mu.ln_1p() as f32,
            dispersion: (var.sqrt() / mu) as f32,
            score: f32::NAN,
        })
        .collect();

    let in_range: Vec<usize> = (0..stats.len())
        .filter(|&g| {
            let (mu, _) = moments[g];
            mu > 0.0 && stats[g].mean >= min_mean && stats[g].mean <= max_mean
        })
        .collect();

    if in_range.is_empty() {
        return (stats, None);
    }

    // method of moments: 1/shape is the typical CV^2 left over after
    // the Poisson part
    let mut excess_cv2: Vec<f64> = in_range
        .iter()
        .map(|&g| {
            let (mu, var) = moments[g];
            var / (mu * mu) - 1.0 / mu
        })
        .collect();
    excess_cv2.sort_by(|a, b| a.total_cmp(b));
    let m = excess_cv2.len();
    let med = if m % 2 == 0 {
        (excess_cv2[m / 2 - 1] + excess_cv2[m / 2]) / 2.0
    } else {
        excess_cv2[m / 2]
    };
    let inv_shape = med.max(0.0);

    let mean_of_means = in_range.iter().map(|&g| moments[g].0).sum::<f64>() / in_range.len() as f64;
    let shape = if inv_shape > 0.0 { 1.0 / inv_shape } else { f64::INFINITY };
    let rate = shape / mean_of_means;

    let excess: Vec<f64> = in_range
        .iter()
        .map(|&g| {
            let (mu, _) = moments[g];
            stats[g].dispersion as f64 - (1.0 / mu + inv_shape).sqrt()
        })
        .collect();

    let n = excess.len() as f64;
    let mean = excess.iter().sum::<f64>() / n;
    let sd = if excess.len() > 1 {
        (excess.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };

    for (&g, &e) in in_range.iter().zip(excess.iter()) {
        stats[g].score = if sd > 0.0 { ((e - mean) / sd) as f32 } else { 0.0 };
    }

    info!(
        "Poisson-Gamma null model: shape = {:.3}, rate = {:.3}",
        shape, rate
    );

    (
        stats,
        Some(NullModel {
            shape: shape as f32,
            rate: rate as f32,
        }),
    )
}
