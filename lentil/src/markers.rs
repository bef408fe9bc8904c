use crate::common::*;
use crate::diff_test::DeTest;

use indicatif::ParallelProgressIterator;
use matrix_util::utils::{downsample, seeded_rng};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Cells on the target side of a comparison
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellGroup {
    Cluster(usize),
    /// column positions in the expression matrix
    Cells(Vec<usize>),
}

/// Cells on the reference side of a comparison
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Comparison {
    /// every other cell
    Rest,
    Cluster(usize),
    Cells(Vec<usize>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerParams {
    pub test: DeTest,
    /// minimum fraction of cells expressing the gene in either group
    pub min_pct: f32,
    /// minimum absolute natural-log fold change
    pub logfc_threshold: f32,
    /// report only genes higher in the target group
    pub only_pos: bool,
    /// downsample each group to at most this many cells
    pub max_cells_per_group: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for MarkerParams {
    fn default() -> Self {
        Self {
            test: DeTest::RankSum,
            min_pct: 0.1,
            logfc_threshold: 0.25,
            only_pos: false,
            max_cells_per_group: None,
            seed: Some(42),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MarkerRecord {
    pub gene: Box<str>,
    /// row of the gene in the expression matrix
    pub gene_index: usize,
    pub statistic: f64,
    /// `ln(mean(expm1(x_target)) + 1) - ln(mean(expm1(x_comparison)) + 1)`
    pub effect_size: f32,
    pub p_value: f64,
    /// Bonferroni over the tested genes
    pub p_value_adj: f64,
    pub pct_target: f32,
    pub pct_comparison: f32,
    pub cluster: Option<usize>,
}

/// Marker records sorted by adjusted p-value, then by decreasing effect
#[derive(Clone, Debug, Default)]
pub struct MarkerTable {
    pub records: Vec<MarkerRecord>,
}

impl MarkerTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn genes(&self) -> Vec<Box<str>> {
        self.records.iter().map(|r| r.gene.clone()).collect()
    }

    pub fn find(&self, gene: &str) -> Option<&MarkerRecord> {
        self.records.iter().find(|r| r.gene.as_ref() == gene)
    }
}

/// Turn a target and a comparison into two disjoint, non-empty lists
/// of column positions
///
/// * `labels` - cluster label per column, required for cluster groups
/// * `ncells` - number of columns
pub fn resolve_groups(
    target: &CellGroup,
    comparison: &Comparison,
    labels: Option<&[usize]>,
    ncells: usize,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let cluster_cells = |k: usize| -> Result<Vec<usize>> {
        let labels = labels.ok_or_else(|| {
            PipelineError::Ordering("cluster groups need a clustering".into())
        })?;
        let cells: Vec<usize> = (0..labels.len()).filter(|&j| labels[j] == k).collect();
        if cells.is_empty() {
            return Err(PipelineError::Data(format!("no cluster {}", k)));
        }
        Ok(cells)
    };

    let checked = |cells: &[usize], side: &str| -> Result<Vec<usize>> {
        if let Some(&j) = cells.iter().find(|&&j| j >= ncells) {
            return Err(PipelineError::Data(format!(
                "{} cell {} out of range ({} cells)",
                side, j, ncells
            )));
        }
        let mut cells = cells.to_vec();
        cells.sort_unstable();
        cells.dedup();
        Ok(cells)
    };

    let target_cells = match target {
        CellGroup::Cluster(k) => cluster_cells(*k)?,
        CellGroup::Cells(cells) => checked(cells, "target")?,
    };

    let comparison_cells = match comparison {
        Comparison::Rest => {
            let mut in_target = vec![false; ncells];
            target_cells.iter().for_each(|&j| in_target[j] = true);
            (0..ncells).filter(|&j| !in_target[j]).collect()
        }
        Comparison::Cluster(k) => cluster_cells(*k)?,
        Comparison::Cells(cells) => checked(cells, "comparison")?,
    };

    if target_cells.is_empty() || comparison_cells.is_empty() {
        return Err(PipelineError::Data(format!(
            "empty group: {} target and {} comparison cells",
            target_cells.len(),
            comparison_cells.len()
        )));
    }

    // both sorted
    let (mut i, mut j) = (0, 0);
    while i < target_cells.len() && j < comparison_cells.len() {
        match target_cells[i].cmp(&comparison_cells[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                return Err(PipelineError::Data(format!(
                    "cell {} is in both groups",
                    target_cells[i]
                )));
            }
        }
    }

    Ok((target_cells, comparison_cells))
}

/// Test every gene for differential expression between two groups of
/// cells
///
/// * `expr` - log-normalized expression, genes x cells
/// * `genes` - gene names, one per row
/// * `target`, `comparison` - disjoint column positions
/// * `cluster` - label stored in each record
pub fn find_markers(
    expr: &CscMat,
    genes: &[Box<str>],
    target: &[usize],
    comparison: &[usize],
    params: &MarkerParams,
    cluster: Option<usize>,
) -> Result<MarkerTable> {
    if genes.len() != expr.nrows() {
        return Err(PipelineError::Data(format!(
            "{} gene names for {} rows",
            genes.len(),
            expr.nrows()
        )));
    }
    if target.is_empty() || comparison.is_empty() {
        return Err(PipelineError::Data("empty group".into()));
    }
    if let Some(&j) = target.iter().chain(comparison).find(|&&j| j >= expr.ncols()) {
        return Err(PipelineError::Data(format!(
            "cell {} out of range ({} cells)",
            j,
            expr.ncols()
        )));
    }

    let mut target = target.to_vec();
    let mut comparison = comparison.to_vec();

    if let Some(max_cells) = params.max_cells_per_group {
        warn_if_unseeded("marker downsampling", params.seed);
        let mut rng = seeded_rng(params.seed);
        downsample(&mut target, max_cells, &mut rng);
        downsample(&mut comparison, max_cells, &mut rng);
    }

    // column -> (side, position within side)
    let ncells = expr.ncols();
    let mut slot: Vec<Option<(bool, usize)>> = vec![None; ncells];
    target
        .iter()
        .enumerate()
        .for_each(|(pos, &j)| slot[j] = Some((true, pos)));
    comparison
        .iter()
        .enumerate()
        .for_each(|(pos, &j)| slot[j] = Some((false, pos)));

    let rows = CsrMatrix::from(expr);
    let tester = params.test.tester();
    let ngenes = rows.nrows();

    let tested: Vec<MarkerRecord> = (0..ngenes)
        .into_par_iter()
        .progress_count(ngenes as u64)
        .filter_map(|g| {
            let row = rows.row(g);
            let mut a = vec![0.0f32; target.len()];
            let mut b = vec![0.0f32; comparison.len()];
            for (&j, &x) in row.col_indices().iter().zip(row.values()) {
                match slot[j] {
                    Some((true, pos)) => a[pos] = x,
                    Some((false, pos)) => b[pos] = x,
                    None => {}
                }
            }

            let pct_target = detection_rate(&a);
            let pct_comparison = detection_rate(&b);
            if pct_target.max(pct_comparison) < params.min_pct {
                return None;
            }

            let effect_size = (mean_expm1(&a).ln_1p() - mean_expm1(&b).ln_1p()) as f32;
            let passes = if params.only_pos {
                effect_size > 0.0 && effect_size >= params.logfc_threshold
            } else {
                effect_size.abs() >= params.logfc_threshold
            };
            if !passes {
                return None;
            }

            let outcome = tester.test(&a, &b);
            Some(MarkerRecord {
                gene: genes[g].clone(),
                gene_index: g,
                statistic: outcome.statistic,
                effect_size,
                p_value: outcome.p_value,
                p_value_adj: outcome.p_value,
                pct_target,
                pct_comparison,
                cluster,
            })
        })
        .collect();

    let ntested = tested.len() as f64;
    let mut records = tested;
    records
        .iter_mut()
        .for_each(|r| r.p_value_adj = (r.p_value * ntested).min(1.0));
    sort_records(&mut records);

    info!(
        "{} test: {} vs {} cells, {} of {} genes tested",
        tester.name(),
        target.len(),
        comparison.len(),
        records.len(),
        ngenes
    );

    Ok(MarkerTable { records })
}

/// Markers of every cluster against all other cells, concatenated in
/// cluster order
pub fn find_all_markers(
    expr: &CscMat,
    genes: &[Box<str>],
    labels: &[usize],
    params: &MarkerParams,
) -> Result<MarkerTable> {
    if labels.len() != expr.ncols() {
        return Err(PipelineError::Data(format!(
            "{} labels for {} cells",
            labels.len(),
            expr.ncols()
        )));
    }
    let n_clusters = labels.iter().max().map(|&k| k + 1).unwrap_or(0);
    if n_clusters < 2 {
        return Err(PipelineError::Data(format!(
            "need at least two clusters, found {}",
            n_clusters
        )));
    }

    let mut records = vec![];
    for k in 0..n_clusters {
        let (target, rest) = resolve_groups(
            &CellGroup::Cluster(k),
            &Comparison::Rest,
            Some(labels),
            expr.ncols(),
        )?;
        info!("markers of cluster {} ({} cells)", k, target.len());
        let table = find_markers(expr, genes, &target, &rest, params, Some(k))?;
        records.extend(table.records);
    }

    Ok(MarkerTable { records })
}

fn sort_records(records: &mut [MarkerRecord]) {
    records.sort_by(|x, y| {
        x.p_value_adj
            .total_cmp(&y.p_value_adj)
            .then(y.effect_size.total_cmp(&x.effect_size))
            .then(x.gene_index.cmp(&y.gene_index))
    });
}

fn detection_rate(x: &[f32]) -> f32 {
    x.iter().filter(|&&v| v > 0.0).count() as f32 / x.len() as f32
}

fn mean_expm1(x: &[f32]) -> f64 {
    x.iter().map(|&v| (v as f64).exp_m1()).sum::<f64>() / x.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    /// gene 0 on in the first half, gene 1 everywhere, gene 2 rare
    fn toy_expr() -> (CscMat, Vec<Box<str>>) {
        let mut coo = CooMatrix::new(3, 20);
        for j in 0..20 {
            if j < 10 {
                coo.push(0, j, 2.0 + 0.01 * j as f32);
            }
            coo.push(1, j, 1.0);
        }
        coo.push(2, 19, 0.5);
        let genes = vec!["A".into(), "B".into(), "C".into()];
        (CscMat::from(&coo), genes)
    }

    #[test]
    fn test_two_sided_marker() -> anyhow::Result<()> {
        let (expr, genes) = toy_expr();
        let target: Vec<usize> = (0..10).collect();
        let rest: Vec<usize> = (10..20).collect();
        let table = find_markers(&expr, &genes, &target, &rest, &MarkerParams::default(), None)?;

        // B has no fold change, C is below min_pct
        assert_eq!(table.len(), 1);
        let rec = &table.records[0];
        assert_eq!(rec.gene.as_ref(), "A");
        assert!(rec.effect_size > 1.0);
        assert_eq!(rec.pct_target, 1.0);
        assert_eq!(rec.pct_comparison, 0.0);
        assert!(rec.p_value_adj < 1e-3);
        Ok(())
    }

    #[test]
    fn test_only_pos() -> anyhow::Result<()> {
        let (expr, genes) = toy_expr();
        let target: Vec<usize> = (10..20).collect();
        let rest: Vec<usize> = (0..10).collect();

        let both = find_markers(&expr, &genes, &target, &rest, &MarkerParams::default(), None)?;
        assert_eq!(both.len(), 1);
        assert!(both.records[0].effect_size < 0.0);

        let params = MarkerParams {
            only_pos: true,
            ..Default::default()
        };
        let pos = find_markers(&expr, &genes, &target, &rest, &params, None)?;
        assert!(pos.is_empty());
        Ok(())
    }

    #[test]
    fn test_bonferroni_and_order() -> anyhow::Result<()> {
        let (expr, genes) = toy_expr();
        let target: Vec<usize> = (0..10).collect();
        let rest: Vec<usize> = (10..20).collect();
        let params = MarkerParams {
            min_pct: 0.0,
            logfc_threshold: 0.0,
            test: DeTest::TTest,
            ..Default::default()
        };
        let table = find_markers(&expr, &genes, &target, &rest, &params, Some(3))?;
        assert_eq!(table.len(), 3);
        for r in table.records.iter() {
            assert_eq!(r.p_value_adj, (r.p_value * 3.0).min(1.0));
            assert_eq!(r.cluster, Some(3));
        }
        assert!(table
            .records
            .windows(2)
            .all(|w| w[0].p_value_adj <= w[1].p_value_adj));
        assert_eq!(table.records[0].gene.as_ref(), "A");
        Ok(())
    }

    #[test]
    fn test_resolve_groups() {
        let labels = [0, 0, 1, 1, 2];
        let (a, b) =
            resolve_groups(&CellGroup::Cluster(1), &Comparison::Rest, Some(&labels[..]), 5).unwrap();
        assert_eq!(a, vec![2, 3]);
        assert_eq!(b, vec![0, 1, 4]);

        let (a, b) = resolve_groups(
            &CellGroup::Cells(vec![4, 0]),
            &Comparison::Cluster(1),
            Some(&labels[..]),
            5,
        )
        .unwrap();
        assert_eq!(a, vec![0, 4]);
        assert_eq!(b, vec![2, 3]);

        assert!(matches!(
            resolve_groups(
                &CellGroup::Cells(vec![0, 1]),
                &Comparison::Cells(vec![1, 2]),
                None,
                5
            ),
            Err(PipelineError::Data(_))
        ));
        assert!(matches!(
            resolve_groups(&CellGroup::Cluster(0), &Comparison::Rest, None, 5),
            Err(PipelineError::Ordering(_))
        ));
        assert!(matches!(
            resolve_groups(&CellGroup::Cells(vec![]), &Comparison::Rest, None, 5),
            Err(PipelineError::Data(_))
        ));
    }

    #[test]
    fn test_find_all_markers() -> anyhow::Result<()> {
        let (expr, genes) = toy_expr();
        let labels: Vec<usize> = (0..20).map(|j| if j < 10 { 0 } else { 1 }).collect();
        let table = find_all_markers(&expr, &genes, &labels, &MarkerParams::default())?;
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0].cluster, Some(0));
        assert_eq!(table.records[1].cluster, Some(1));
        Ok(())
    }

    #[test]
    fn test_downsampling_is_seeded() -> anyhow::Result<()> {
        let (expr, genes) = toy_expr();
        let target: Vec<usize> = (0..10).collect();
        let rest: Vec<usize> = (10..20).collect();
        let params = MarkerParams {
            max_cells_per_group: Some(4),
            seed: Some(5),
            ..Default::default()
        };
        let a = find_markers(&expr, &genes, &target, &rest, &params, None)?;
        let b = find_markers(&expr, &genes, &target, &rest, &params, None)?;
        assert_eq!(a.records[0].statistic, b.records[0].statistic);
        assert_eq!(a.records[0].statistic, 16.0);
        Ok(())
    }
}
