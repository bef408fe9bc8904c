//! Tab-separated, gzipped result tables named `{out}.{table}.tsv.gz`

use crate::common::*;
use crate::dataset::Dataset;
use crate::markers::MarkerTable;

use matrix_util::common_io::write_lines;
use matrix_util::traits::IoOps;

fn names(xs: &[&str]) -> Vec<Box<str>> {
    xs.iter().map(|&x| x.into()).collect()
}

fn numbered(prefix: &str, n: usize) -> Vec<Box<str>> {
    (1..=n).map(|k| format!("{}{}", prefix, k).into()).collect()
}

/// `{out}.qc.tsv.gz`: counts, detected genes and mitochondrial
/// percentage of the surviving cells
pub fn write_qc(dataset: &Dataset, out: &str) -> anyhow::Result<()> {
    let qc = dataset.qc();
    let with_mito = qc.mito_fraction.is_some();
    let ncol = if with_mito { 3 } else { 2 };

    let mut mat = Mat::zeros(dataset.num_cells(), ncol);
    for j in 0..dataset.num_cells() {
        mat[(j, 0)] = qc.total_counts[j];
        mat[(j, 1)] = qc.detected_genes[j] as f32;
        if let Some(frac) = qc.mito_fraction.as_ref() {
            mat[(j, 2)] = 100.0 * frac[j];
        }
    }

    let columns = if with_mito {
        names(&["n_counts", "n_genes", "percent_mito"])
    } else {
        names(&["n_counts", "n_genes"])
    };
    mat.to_tsv_with_names(&format!("{}.qc.tsv.gz", out), dataset.barcodes(), &columns)
}

/// `{out}.features.tsv.gz`: variability statistics of every gene and
/// whether it was selected
pub fn write_features(dataset: &Dataset, out: &str) -> anyhow::Result<()> {
    let Some(features) = dataset.features() else {
        return Ok(());
    };

    let mut mat = Mat::zeros(features.stats.len(), 4);
    for (g, s) in features.stats.iter().enumerate() {
        mat[(g, 0)] = s.mean;
        mat[(g, 1)] = s.dispersion;
        mat[(g, 2)] = s.score;
    }
    for &g in features.genes.iter() {
        mat[(g, 3)] = 1.0;
    }

    mat.to_tsv_with_names(
        &format!("{}.features.tsv.gz", out),
        dataset.gene_names(),
        &names(&["mean", "dispersion", "score", "selected"]),
    )
}

/// `{out}.pca.tsv.gz` (scores) and `{out}.pca_variance.tsv.gz`
pub fn write_pca(dataset: &Dataset, out: &str) -> anyhow::Result<()> {
    let Some(pca) = dataset.pca() else {
        return Ok(());
    };
    let kk = pca.n_components();

    pca.scores.to_tsv_with_names(
        &format!("{}.pca.tsv.gz", out),
        dataset.barcodes(),
        &numbered("PC", kk),
    )?;

    let mut variance = Mat::zeros(kk, 2);
    for k in 0..kk {
        variance[(k, 0)] = pca.variance_explained[k];
        variance[(k, 1)] = pca.stdev[k];
    }
    variance.to_tsv_with_names(
        &format!("{}.pca_variance.tsv.gz", out),
        &numbered("PC", kk),
        &names(&["variance_explained", "stdev"]),
    )
}

/// `{out}.clusters.tsv.gz`: one label per surviving cell
pub fn write_clusters(dataset: &Dataset, out: &str) -> anyhow::Result<()> {
    let Some(clusters) = dataset.clusters() else {
        return Ok(());
    };

    let mut lines: Vec<Box<str>> = Vec::with_capacity(clusters.labels.len() + 1);
    lines.push("name\tcluster".into());
    for (barcode, &label) in dataset.barcodes().iter().zip(clusters.labels.iter()) {
        lines.push(format!("{}\t{}", barcode, label).into_boxed_str());
    }
    write_lines(&lines, &format!("{}.clusters.tsv.gz", out))
}

/// `{out}.tsne.tsv.gz`: two-dimensional embedding of the surviving cells
pub fn write_tsne(dataset: &Dataset, out: &str) -> anyhow::Result<()> {
    let Some(embedding) = dataset.embedding() else {
        return Ok(());
    };
    embedding.to_tsv_with_names(
        &format!("{}.tsne.tsv.gz", out),
        dataset.barcodes(),
        &names(&["tSNE_1", "tSNE_2"]),
    )
}

/// `{out}.markers.tsv.gz`: marker records in table order
pub fn write_markers(table: &MarkerTable, out: &str) -> anyhow::Result<()> {
    let mut lines: Vec<Box<str>> = Vec::with_capacity(table.len() + 1);
    lines.push(
        [
            "gene",
            "cluster",
            "statistic",
            "effect_size",
            "p_value",
            "p_value_adj",
            "pct_target",
            "pct_comparison",
        ]
        .join("\t")
        .into_boxed_str(),
    );

    for r in table.records.iter() {
        let cluster = r
            .cluster
            .map(|k| k.to_string())
            .unwrap_or_else(|| "NA".to_string());
        lines.push(
            format!(
                "{}\t{}\t{}\t{}\t{:e}\t{:e}\t{:.3}\t{:.3}",
                r.gene,
                cluster,
                r.statistic,
                r.effect_size,
                r.p_value,
                r.p_value_adj,
                r.pct_target,
                r.pct_comparison
            )
            .into_boxed_str(),
        );
    }

    write_lines(&lines, &format!("{}.markers.tsv.gz", out))
}

/// Every table the dataset has results for
pub fn write_all(dataset: &Dataset, markers: Option<&MarkerTable>, out: &str) -> anyhow::Result<()> {
    write_qc(dataset, out)?;
    write_features(dataset, out)?;
    write_pca(dataset, out)?;
    write_clusters(dataset, out)?;
    write_tsne(dataset, out)?;
    if let Some(table) = markers {
        write_markers(table, out)?;
    }
    info!("wrote results to {}.*.tsv.gz", out);
    Ok(())
}
