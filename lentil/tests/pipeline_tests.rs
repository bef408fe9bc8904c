use lentil::cluster::ClusterParams;
use lentil::feature_selection::{FeatureSelectionParams, HvgMethod};
use lentil::markers::{CellGroup, Comparison, MarkerParams};
use lentil::normalize::NormalizeParams;
use lentil::output::write_all;
use lentil::pca::PcaParams;
use lentil::scale::ScaleParams;
use lentil::tsne::TsneParams;
use lentil::{run_pipeline, Dataset, PipelineParams, Stage};

use approx::assert_abs_diff_eq;
use lentil_data::count_matrix::CountMatrix;
use lentil_data::mtx_dir::{read_10x_dir, write_10x_dir};
use lentil_data::qc::QcThresholds;
use lentil_data::simulate::{generate_grouped_poisson_data, SimArgs};
use matrix_util::common_io::read_lines;

fn names(prefix: &str, n: usize) -> Vec<Box<str>> {
    (1..=n).map(|i| format!("{}{}", prefix, i).into()).collect()
}

/// two groups of three cells: genes 1-2 up in the first, genes 3-4 up
/// in the second, gene 5 constant
fn two_group_toy() -> anyhow::Result<CountMatrix> {
    let cells = vec![
        vec![10., 12., 0., 1., 5.],
        vec![11., 10., 1., 0., 5.],
        vec![12., 11., 0., 0., 5.],
        vec![0., 1., 11., 10., 5.],
        vec![1., 0., 12., 11., 5.],
        vec![0., 0., 10., 12., 5.],
    ];
    CountMatrix::from_cells(&cells, names("g", 5), names("c", 6))
}

fn toy_feature_params() -> FeatureSelectionParams {
    FeatureSelectionParams {
        method: HvgMethod::MeanVarPlot {
            n_bins: 1,
            min_mean: 0.0,
            max_mean: 100.0,
            min_dispersion: -10.0,
        },
        max_features: None,
    }
}

#[test]
fn two_groups_end_to_end() -> anyhow::Result<()> {
    let mut dataset = Dataset::new(two_group_toy()?)?;

    dataset.filter_cells(&QcThresholds::default())?;
    assert_eq!(dataset.num_cells(), 6);
    assert_eq!(dataset.num_genes(), 5);

    dataset.normalize(&NormalizeParams::default())?;
    dataset.select_features(&toy_feature_params())?;

    let selected = dataset.feature_names();
    for g in ["g1", "g2", "g3", "g4"] {
        assert!(selected.iter().any(|s| s.as_ref() == g), "{} not selected", g);
    }

    dataset.scale(&ScaleParams::default())?;
    dataset.run_pca(&PcaParams {
        n_components: 2,
        ..Default::default()
    })?;
    assert_eq!(dataset.stage(), Stage::Reduced);

    let cluster_params = ClusterParams {
        dims: 2,
        knn: 3,
        resolution: 1.0,
        seed: Some(7),
        ..Default::default()
    };
    let labels = dataset.cluster(&cluster_params)?.labels.clone();

    assert_eq!(labels.iter().max(), Some(&1));
    assert!(labels[0] == labels[1] && labels[1] == labels[2]);
    assert!(labels[3] == labels[4] && labels[4] == labels[5]);
    assert_ne!(labels[0], labels[3]);

    let params = MarkerParams {
        only_pos: true,
        ..Default::default()
    };
    let table = dataset.find_all_markers(&params)?;

    let top_two = |k: usize| -> Vec<Box<str>> {
        let mut top: Vec<Box<str>> = table
            .records
            .iter()
            .filter(|r| r.cluster == Some(k))
            .take(2)
            .map(|r| r.gene.clone())
            .collect();
        top.sort();
        top
    };

    let first: Vec<Box<str>> = vec!["g1".into(), "g2".into()];
    let second: Vec<Box<str>> = vec!["g3".into(), "g4".into()];
    assert_eq!(top_two(labels[0]), first);
    assert_eq!(top_two(labels[3]), second);
    assert!(table.records.iter().all(|r| r.gene.as_ref() != "g5"));
    Ok(())
}

#[test]
fn all_or_nothing_marker_gene() -> anyhow::Result<()> {
    // gene X: 100 counts in the first 100 cells, none in the rest
    let cells: Vec<Vec<f32>> = (0..200)
        .map(|j| vec![if j < 100 { 100. } else { 0. }, 10.])
        .collect();
    let raw = CountMatrix::from_cells(&cells, vec!["X".into(), "H".into()], names("c", 200))?;

    let mut dataset = Dataset::new(raw)?;
    dataset.filter_cells(&QcThresholds::default())?;
    dataset.normalize(&NormalizeParams::default())?;
    dataset.select_features(&toy_feature_params())?;
    dataset.scale(&ScaleParams::default())?;
    dataset.run_pca(&PcaParams {
        n_components: 1,
        ..Default::default()
    })?;
    let labels = dataset
        .cluster(&ClusterParams {
            dims: 1,
            knn: 10,
            resolution: 0.5,
            seed: Some(1),
            ..Default::default()
        })?
        .labels
        .clone();

    let k = labels[0];
    assert!(labels[..100].iter().all(|&l| l == k));
    assert!(labels[100..].iter().all(|&l| l != k));

    let params = MarkerParams {
        only_pos: true,
        ..Default::default()
    };
    let table = dataset.find_markers(&CellGroup::Cluster(k), &Comparison::Rest, &params)?;

    assert_eq!(table.records[0].gene.as_ref(), "X");
    let x = &table.records[0];
    let expected = (1.0f32 + 1e4 * 100.0 / 110.0).ln();
    assert_abs_diff_eq!(x.effect_size, expected, epsilon = 0.15);
    assert!(x.p_value_adj < 0.05);
    assert_eq!(x.pct_target, 1.0);
    assert_eq!(x.pct_comparison, 0.0);
    assert_eq!(x.cluster, Some(k));

    // H is lower in the cluster
    assert!(table.find("H").is_none());
    Ok(())
}

fn simulated(rseed: u64) -> anyhow::Result<(CountMatrix, Vec<usize>, Vec<Vec<usize>>)> {
    let sim = generate_grouped_poisson_data(&SimArgs {
        cells: 240,
        genes: 300,
        groups: 3,
        markers: 20,
        mito_genes: 5,
        depth: 2000.0,
        fold_change: 8.0,
        rseed,
    })?;
    Ok((sim.data, sim.membership, sim.group_markers))
}

fn simulated_params() -> PipelineParams {
    let mut params = PipelineParams::default();
    params.qc.mito_prefix = Some("MT-".into());
    params.qc.max_mito_fraction = Some(0.5);
    params.qc.min_cells = Some(3);
    params.features.method = HvgMethod::MeanVarPlot {
        n_bins: 20,
        min_mean: 0.0125,
        max_mean: 100.0,
        min_dispersion: 0.5,
    };
    params.scale.regress_out = vec!["n_counts".into()];
    params.pca.n_components = 10;
    params.cluster.dims = 10;
    params.tsne.perplexity = 10.0;
    params.tsne.n_iter = 300;
    params.tsne.early_exaggeration_iter = 100;
    params.markers.only_pos = true;
    params
}

#[test]
fn simulated_groups_are_recovered() -> anyhow::Result<()> {
    let (raw, membership, group_markers) = simulated(11)?;
    let gene_names = raw.genes.clone();
    let params = simulated_params();

    let output = run_pipeline(raw, &params)?;
    let dataset = &output.dataset;

    let clusters = dataset.clusters().ok_or(anyhow::anyhow!("no clusters"))?;
    assert!(clusters.n_clusters >= 3);

    // every cluster is dominated by one true group
    let truth: Vec<usize> = dataset
        .raw_cell_indices()
        .iter()
        .map(|&j| membership[j])
        .collect();
    let mut majority = vec![0; clusters.n_clusters];
    for k in 0..clusters.n_clusters {
        let mut freq = [0usize; 3];
        for (j, &l) in clusters.labels.iter().enumerate() {
            if l == k {
                freq[truth[j]] += 1;
            }
        }
        let size: usize = freq.iter().sum();
        let (best, &count) = freq
            .iter()
            .enumerate()
            .max_by_key(|&(_, &c)| c)
            .unwrap();
        assert!(count as f32 >= 0.9 * size as f32, "cluster {} is mixed", k);
        majority[k] = best;
    }

    let embedding = dataset.embedding().ok_or(anyhow::anyhow!("no t-SNE"))?;
    assert_eq!(embedding.shape(), (dataset.num_cells(), 2));
    assert!(embedding.iter().all(|x| x.is_finite()));

    // the best marker of each cluster marks its group
    let markers = output.markers.as_ref().ok_or(anyhow::anyhow!("no markers"))?;
    for k in 0..clusters.n_clusters {
        let top = markers
            .records
            .iter()
            .find(|r| r.cluster == Some(k))
            .ok_or(anyhow::anyhow!("cluster {} without markers", k))?;
        let expected: Vec<&str> = group_markers[majority[k]]
            .iter()
            .map(|&g| gene_names[g].as_ref())
            .collect();
        assert!(expected.contains(&top.gene.as_ref()), "{} of cluster {}", top.gene, k);
    }
    Ok(())
}

#[test]
fn pipeline_is_reproducible_with_seeds() -> anyhow::Result<()> {
    let mut params = simulated_params();
    params.skip_markers = true;

    let (raw, _, _) = simulated(3)?;
    let first = run_pipeline(raw.clone(), &params)?;
    let second = run_pipeline(raw, &params)?;

    let labels = |out: &lentil::PipelineOutput| -> Vec<usize> {
        out.dataset
            .clusters()
            .map(|c| c.labels.clone())
            .unwrap_or_default()
    };
    assert_eq!(labels(&first), labels(&second));
    assert_eq!(first.dataset.embedding(), second.dataset.embedding());
    assert!(first.markers.is_none());
    Ok(())
}

#[test]
fn read_run_and_write_tables() -> anyhow::Result<()> {
    let (raw, _, _) = simulated(5)?;

    let dir = tempfile::tempdir()?;
    let data_dir = dir.path().join("data");
    let data_dir = data_dir.to_str().unwrap();
    write_10x_dir(&raw, data_dir)?;

    let mut params = simulated_params();
    params.skip_tsne = true;

    let output = run_pipeline(read_10x_dir(data_dir)?, &params)?;
    let out = dir.path().join("result");
    let out = out.to_str().unwrap();
    write_all(&output.dataset, output.markers.as_ref(), out)?;

    let ncells = output.dataset.num_cells();

    let clusters = read_lines(&format!("{}.clusters.tsv.gz", out))?;
    assert_eq!(clusters.len(), ncells + 1);

    let qc = read_lines(&format!("{}.qc.tsv.gz", out))?;
    assert_eq!(qc.len(), ncells + 1);
    assert!(qc[0].contains("percent_mito"));

    let pca = read_lines(&format!("{}.pca.tsv.gz", out))?;
    assert_eq!(pca.len(), ncells + 1);

    let markers = read_lines(&format!("{}.markers.tsv.gz", out))?;
    assert!(markers.len() > 1);

    assert!(!std::path::Path::new(&format!("{}.tsne.tsv.gz", out)).exists());
    Ok(())
}

#[test]
fn stage_order_is_enforced_end_to_end() -> anyhow::Result<()> {
    let mut dataset = Dataset::new(two_group_toy()?)?;

    assert!(dataset.normalize(&NormalizeParams::default()).is_err());
    assert!(dataset.embed_tsne(&TsneParams::default()).is_err());
    assert_eq!(dataset.stage(), Stage::Loaded);

    dataset.filter_cells(&QcThresholds::default())?;
    dataset.normalize(&NormalizeParams::default())?;
    assert!(dataset.run_pca(&PcaParams::default()).is_err());
    assert_eq!(dataset.stage(), Stage::Normalized);
    Ok(())
}
