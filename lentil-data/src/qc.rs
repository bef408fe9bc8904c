use crate::count_matrix::CountMatrix;

use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-cell and per-gene quality control statistics
#[derive(Clone, Debug)]
pub struct QcStats {
    /// total count per cell
    pub total_counts: Vec<f32>,
    /// number of genes with a non-zero count per cell
    pub detected_genes: Vec<usize>,
    /// fraction of counts on mitochondrial genes per cell
    pub mito_fraction: Option<Vec<f32>>,
    /// number of cells with a non-zero count per gene
    pub cells_per_gene: Vec<usize>,
}

/// Thresholds of the cell and gene filters; unset bounds are open.
/// Every bound is inclusive.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QcThresholds {
    pub min_genes: Option<usize>,
    pub max_genes: Option<usize>,
    pub min_counts: Option<f32>,
    pub max_counts: Option<f32>,
    pub max_mito_fraction: Option<f32>,
    /// a gene is kept if detected in at least this many cells
    pub min_cells: Option<usize>,
    /// prefix of mitochondrial gene symbols, e.g., `MT-`
    pub mito_prefix: Option<String>,
}

/// Indices of the genes whose symbol starts with `prefix`
pub fn mito_gene_indices(genes: &[Box<str>], prefix: &str) -> Vec<usize> {
    genes
        .iter()
        .enumerate()
        .filter(|(_, g)| g.starts_with(prefix))
        .map(|(i, _)| i)
        .collect()
}

/// collect Q/C statistics over all genes and cells of `data`
/// * `data` - raw counts
/// * `mito_genes` - if given, row indices of mitochondrial genes
pub fn collect_qc_stats(data: &CountMatrix, mito_genes: Option<&[usize]>) -> QcStats {
    let nn = data.num_cells();

    let is_mito: Option<Vec<bool>> = mito_genes.map(|mito| {
        let mut flag = vec![false; data.num_genes()];
        mito.iter().for_each(|&i| flag[i] = true);
        flag
    });

    let per_cell: Vec<(f32, usize, f32)> = (0..nn)
        .into_par_iter()
        .map(|j| {
            let (rows, vals) = data.cell(j);
            let total: f32 = vals.iter().sum();
            let detected = vals.iter().filter(|&&x| x > 0.0).count();
            let mito: f32 = match is_mito.as_ref() {
                Some(flag) => rows
                    .iter()
                    .zip(vals.iter())
                    .filter(|&(&i, _)| flag[i])
                    .map(|(_, &x)| x)
                    .sum(),
                None => 0.0,
            };
            (total, detected, mito)
        })
        .collect();

    let mut cells_per_gene = vec![0usize; data.num_genes()];
    for (&i, &x) in data.counts.row_indices().iter().zip(data.counts.values()) {
        if x > 0.0 {
            cells_per_gene[i] += 1;
        }
    }

    let mito_fraction = is_mito.map(|_| {
        per_cell
            .iter()
            .map(|&(total, _, mito)| if total > 0.0 { mito / total } else { 0.0 })
            .collect()
    });

    QcStats {
        total_counts: per_cell.iter().map(|x| x.0).collect(),
        detected_genes: per_cell.iter().map(|x| x.1).collect(),
        mito_fraction,
        cells_per_gene,
    }
}

fn within<T: PartialOrd + Copy>(x: T, lb: Option<T>, ub: Option<T>) -> bool {
    lb.is_none_or(|lb| x >= lb) && ub.is_none_or(|ub| x <= ub)
}

impl QcStats {
    /// Cells passing every per-cell threshold. Cells without any
    /// count never pass.
    pub fn passing_cells(&self, cutoffs: &QcThresholds) -> Vec<usize> {
        (0..self.total_counts.len())
            .filter(|&j| {
                let total = self.total_counts[j];
                let mito_ok = match (&self.mito_fraction, cutoffs.max_mito_fraction) {
                    (Some(frac), Some(ub)) => frac[j] <= ub,
                    _ => true,
                };
                total > 0.0
                    && within(self.detected_genes[j], cutoffs.min_genes, cutoffs.max_genes)
                    && within(total, cutoffs.min_counts, cutoffs.max_counts)
                    && mito_ok
            })
            .collect()
    }

    /// Genes detected in at least `min_cells` cells
    pub fn passing_genes(&self, cutoffs: &QcThresholds) -> Vec<usize> {
        (0..self.cells_per_gene.len())
            .filter(|&i| within(self.cells_per_gene[i], cutoffs.min_cells, None))
            .collect()
    }

    pub fn summary(&self) {
        let nn = self.total_counts.len().max(1) as f32;
        let mean_total = self.total_counts.iter().sum::<f32>() / nn;
        let mean_genes = self.detected_genes.iter().sum::<usize>() as f32 / nn;
        info!(
            "{} cells: {:.1} counts and {:.1} genes per cell on average",
            self.total_counts.len(),
            mean_total,
            mean_genes
        );
    }
}
