use crate::common::*;
use crate::dataset::Dataset;
use crate::markers::MarkerTable;
use crate::params::PipelineParams;

pub struct PipelineOutput {
    pub dataset: Dataset,
    /// markers of every cluster against the rest; `None` if skipped
    /// or if clustering found a single cluster
    pub markers: Option<MarkerTable>,
}

/// Run every stage in order: filter, normalize, select features,
/// scale, PCA, cluster, t-SNE and markers
pub fn run_pipeline(raw: CountMatrix, params: &PipelineParams) -> Result<PipelineOutput> {
    let mut dataset = Dataset::new(raw)?;

    info!("1. quality control");
    dataset.filter_cells(&params.qc)?;

    info!("2. normalization");
    dataset.normalize(&params.normalize)?;

    info!("3. variable genes");
    dataset.select_features(&params.features)?;

    info!("4. scaling");
    dataset.scale(&params.scale)?;

    info!("5. PCA");
    dataset.run_pca(&params.pca)?;

    info!("6. clustering");
    let n_clusters = dataset.cluster(&params.cluster)?.n_clusters;

    if params.skip_tsne {
        info!("7. t-SNE skipped");
    } else {
        info!("7. t-SNE");
        dataset.embed_tsne(&params.tsne)?;
    }

    let markers = if params.skip_markers {
        info!("8. markers skipped");
        None
    } else if n_clusters < 2 {
        warn!("8. a single cluster, no markers to find");
        None
    } else {
        info!("8. markers of {} clusters", n_clusters);
        Some(dataset.find_all_markers(&params.markers)?)
    };

    Ok(PipelineOutput { dataset, markers })
}
