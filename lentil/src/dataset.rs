//! The dataset aggregate: raw counts plus every derived result of the
//! pipeline stages, invalidated downstream whenever a stage reruns

use crate::cluster::{build_snn_graph, louvain_clustering, ClusterParams, ClusterResult, StoredGraph};
use crate::common::*;
use crate::feature_selection::{select_variable_features, FeatureSelection, FeatureSelectionParams};
use crate::markers::{self, CellGroup, Comparison, MarkerParams, MarkerTable};
use crate::normalize::{log_normalize, NormalizeParams};
use crate::pca::{self, PcaParams, PcaResult};
use crate::scale::{regress_and_scale, ScaleParams};
use crate::tsne::{run_tsne, TsneParams};

use lentil_data::mtx_dir::read_10x_dir;
use lentil_data::qc::{collect_qc_stats, mito_gene_indices, QcThresholds};

pub const N_COUNTS: &str = "n_counts";
pub const N_GENES: &str = "n_genes";
pub const PERCENT_MITO: &str = "percent_mito";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Loaded,
    Filtered,
    Normalized,
    FeaturesSelected,
    Scaled,
    Reduced,
}

/// Quality control statistics of the surviving cells over the
/// surviving genes
#[derive(Clone, Debug)]
pub struct CellQc {
    pub total_counts: Vec<f32>,
    pub detected_genes: Vec<usize>,
    /// fraction of counts on mitochondrial genes, measured over all
    /// genes at the time of filtering
    pub mito_fraction: Option<Vec<f32>>,
}

impl CellQc {
    fn from_counts(data: &CountMatrix, mito_fraction: Option<Vec<f32>>) -> Self {
        let stats = collect_qc_stats(data, None);
        Self {
            total_counts: stats.total_counts,
            detected_genes: stats.detected_genes,
            mito_fraction,
        }
    }
}

pub struct Dataset {
    raw: CountMatrix,
    version: u64,
    filtered: bool,
    /// raw indices of the surviving cells and genes
    cells: Vec<usize>,
    genes: Vec<usize>,
    /// raw counts restricted to the surviving cells and genes
    counts: CountMatrix,
    qc: CellQc,
    /// custom per-cell covariates over the raw cells
    covariates: Vec<(String, Vec<f32>)>,
    normalized: Option<CscMat>,
    scale_factor: Option<f32>,
    features: Option<FeatureSelection>,
    scaled: Option<Mat>,
    pca: Option<PcaResult>,
    /// version at which the current PCA was committed
    pca_version: u64,
    graph: Option<StoredGraph>,
    clusters: Option<ClusterResult>,
    embedding: Option<Mat>,
}

/// A snapshot of the reportable results, tagged with the dataset
/// version it was taken from
#[derive(Clone, Debug)]
pub struct DatasetView {
    pub version: u64,
    pub barcodes: Vec<Box<str>>,
    pub qc: CellQc,
    pub pca_scores: Option<Mat>,
    pub embedding: Option<Mat>,
    pub labels: Option<Vec<usize>>,
}

impl DatasetView {
    pub fn is_stale(&self, dataset: &Dataset) -> bool {
        self.version != dataset.version()
    }
}

impl Dataset {
    pub fn new(raw: CountMatrix) -> Result<Self> {
        if raw.num_cells() == 0 || raw.num_genes() == 0 {
            return Err(PipelineError::Data(format!(
                "empty count matrix: {} genes x {} cells",
                raw.num_genes(),
                raw.num_cells()
            )));
        }

        let cells: Vec<usize> = (0..raw.num_cells()).collect();
        let genes: Vec<usize> = (0..raw.num_genes()).collect();
        let counts = raw.clone();
        let qc = CellQc::from_counts(&counts, None);

        info!(
            "loaded {} genes x {} cells, {} non-zeros",
            raw.num_genes(),
            raw.num_cells(),
            raw.counts.nnz()
        );

        Ok(Self {
            raw,
            version: 0,
            filtered: false,
            cells,
            genes,
            counts,
            qc,
            covariates: vec![],
            normalized: None,
            scale_factor: None,
            features: None,
            scaled: None,
            pca: None,
            pca_version: 0,
            graph: None,
            clusters: None,
            embedding: None,
        })
    }

    /// Read a 10x directory (`matrix.mtx`, `barcodes.tsv`, and
    /// `features.tsv` or `genes.tsv`, each optionally gzipped)
    pub fn from_10x_dir(dir: &str) -> Result<Self> {
        Self::new(read_10x_dir(dir)?)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn stage(&self) -> Stage {
        if self.pca.is_some() {
            Stage::Reduced
        } else if self.scaled.is_some() {
            Stage::Scaled
        } else if self.features.is_some() {
            Stage::FeaturesSelected
        } else if self.normalized.is_some() {
            Stage::Normalized
        } else if self.filtered {
            Stage::Filtered
        } else {
            Stage::Loaded
        }
    }

    pub fn raw(&self) -> &CountMatrix {
        &self.raw
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn raw_cell_indices(&self) -> &[usize] {
        &self.cells
    }

    pub fn raw_gene_indices(&self) -> &[usize] {
        &self.genes
    }

    pub fn barcodes(&self) -> &[Box<str>] {
        &self.counts.barcodes
    }

    pub fn gene_names(&self) -> &[Box<str>] {
        &self.counts.genes
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn qc(&self) -> &CellQc {
        &self.qc
    }

    pub fn normalized(&self) -> Option<&CscMat> {
        self.normalized.as_ref()
    }

    pub fn scale_factor(&self) -> Option<f32> {
        self.scale_factor
    }

    pub fn features(&self) -> Option<&FeatureSelection> {
        self.features.as_ref()
    }

    pub fn feature_names(&self) -> Vec<Box<str>> {
        self.features
            .as_ref()
            .map(|f| f.genes.iter().map(|&g| self.counts.genes[g].clone()).collect())
            .unwrap_or_default()
    }

    pub fn scaled(&self) -> Option<&Mat> {
        self.scaled.as_ref()
    }

    pub fn pca(&self) -> Option<&PcaResult> {
        self.pca.as_ref()
    }

    pub fn graph(&self) -> Option<&StoredGraph> {
        self.graph.as_ref()
    }

    pub fn clusters(&self) -> Option<&ClusterResult> {
        self.clusters.as_ref()
    }

    pub fn embedding(&self) -> Option<&Mat> {
        self.embedding.as_ref()
    }

    pub fn view(&self) -> DatasetView {
        DatasetView {
            version: self.version,
            barcodes: self.counts.barcodes.clone(),
            qc: self.qc.clone(),
            pca_scores: self.pca.as_ref().map(|p| p.scores.clone()),
            embedding: self.embedding.clone(),
            labels: self.clusters.as_ref().map(|c| c.labels.clone()),
        }
    }

    /// Register a per-cell covariate with one value per raw cell
    pub fn add_cell_covariate(&mut self, name: &str, values: Vec<f32>) -> Result<()> {
        if [N_COUNTS, N_GENES, PERCENT_MITO].contains(&name) {
            return Err(PipelineError::Data(format!(
                "{} is a built-in covariate",
                name
            )));
        }
        if values.len() != self.raw.num_cells() {
            return Err(PipelineError::Data(format!(
                "covariate {} has {} values for {} cells",
                name,
                values.len(),
                self.raw.num_cells()
            )));
        }

        match self.covariates.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = values,
            None => self.covariates.push((name.to_string(), values)),
        }
        self.version += 1;
        Ok(())
    }

    /// Values of a named covariate over the surviving cells
    pub fn cell_covariate(&self, name: &str) -> Result<Vec<f32>> {
        match name {
            N_COUNTS => Ok(self.qc.total_counts.clone()),
            N_GENES => Ok(self.qc.detected_genes.iter().map(|&x| x as f32).collect()),
            PERCENT_MITO => self
                .qc
                .mito_fraction
                .as_ref()
                .map(|f| f.iter().map(|&x| 100.0 * x).collect())
                .ok_or_else(|| {
                    PipelineError::Data(
                        "percent_mito needs a mitochondrial prefix when filtering".into(),
                    )
                }),
            _ => {
                let (_, values) = self
                    .covariates
                    .iter()
                    .find(|(n, _)| n == name)
                    .ok_or_else(|| PipelineError::Data(format!("unknown covariate {}", name)))?;
                let ret: Vec<f32> = self.cells.iter().map(|&j| values[j]).collect();
                if ret.iter().any(|x| !x.is_finite()) {
                    return Err(PipelineError::Data(format!(
                        "covariate {} is not finite on every cell",
                        name
                    )));
                }
                Ok(ret)
            }
        }
    }

    /// Keep cells and genes passing every threshold. Statistics are
    /// measured on the current data, so repeated calls only restrict.
    pub fn filter_cells(&mut self, cutoffs: &QcThresholds) -> Result<()> {
        let mito = match cutoffs.mito_prefix.as_deref() {
            Some(prefix) => {
                let mito = mito_gene_indices(&self.counts.genes, prefix);
                if mito.is_empty() {
                    return Err(PipelineError::Data(format!(
                        "no gene name starts with {}",
                        prefix
                    )));
                }
                info!("{} mitochondrial genes ({}...)", mito.len(), prefix);
                Some(mito)
            }
            None if cutoffs.max_mito_fraction.is_some() => {
                return Err(PipelineError::Data(
                    "a mitochondrial threshold needs a gene prefix".into(),
                ));
            }
            None => None,
        };

        let stats = collect_qc_stats(&self.counts, mito.as_deref());
        stats.summary();

        let mut keep_cells = stats.passing_cells(cutoffs);
        let keep_genes = stats.passing_genes(cutoffs);

        if keep_cells.is_empty() {
            return Err(PipelineError::Data(format!(
                "no cell out of {} passes the filters",
                self.num_cells()
            )));
        }
        if keep_genes.is_empty() {
            return Err(PipelineError::InsufficientFeatures(format!(
                "no gene out of {} passes the filters",
                self.num_genes()
            )));
        }

        let mut counts = self.counts.subset(&keep_cells, &keep_genes)?;

        // cells whose counts were all on removed genes
        let totals = collect_qc_stats(&counts, None).total_counts;
        let nonzero: Vec<usize> = (0..totals.len()).filter(|&j| totals[j] > 0.0).collect();
        if nonzero.len() < totals.len() {
            warn!(
                "{} cells have no counts on the remaining genes",
                totals.len() - nonzero.len()
            );
            if nonzero.is_empty() {
                return Err(PipelineError::Data(
                    "no cell has counts on the remaining genes".into(),
                ));
            }
            let all_genes: Vec<usize> = (0..counts.num_genes()).collect();
            counts = counts.subset(&nonzero, &all_genes)?;
            keep_cells = nonzero.iter().map(|&j| keep_cells[j]).collect();
        }

        let mito_fraction = match &stats.mito_fraction {
            Some(frac) => Some(keep_cells.iter().map(|&j| frac[j]).collect()),
            None => self
                .qc
                .mito_fraction
                .as_ref()
                .map(|frac| keep_cells.iter().map(|&j| frac[j]).collect()),
        };

        info!(
            "kept {} of {} cells and {} of {} genes",
            keep_cells.len(),
            self.num_cells(),
            keep_genes.len(),
            self.num_genes()
        );

        // commit
        self.cells = keep_cells.iter().map(|&j| self.cells[j]).collect();
        self.genes = keep_genes.iter().map(|&i| self.genes[i]).collect();
        self.qc = CellQc::from_counts(&counts, mito_fraction);
        self.counts = counts;
        self.filtered = true;
        self.clear_from(Stage::Filtered);
        Ok(())
    }

    pub fn normalize(&mut self, params: &NormalizeParams) -> Result<f32> {
        self.require(Stage::Filtered, "normalization")?;
        let (normalized, sf) = log_normalize(&self.counts.counts, params.scale_factor)?;

        self.clear_from(Stage::Normalized);
        self.normalized = Some(normalized);
        self.scale_factor = Some(sf);
        Ok(sf)
    }

    /// Select variable genes; returns the number selected
    pub fn select_features(&mut self, params: &FeatureSelectionParams) -> Result<usize> {
        self.require(Stage::Normalized, "feature selection")?;
        let normalized = self.normalized.as_ref().ok_or(ordering("feature selection"))?;
        let selection = select_variable_features(normalized, params)?;
        let nselected = selection.len();

        self.clear_from(Stage::FeaturesSelected);
        self.features = Some(selection);
        Ok(nselected)
    }

    /// Regress the named covariates out of the selected features and
    /// standardize them
    pub fn scale(&mut self, params: &ScaleParams) -> Result<()> {
        self.require(Stage::FeaturesSelected, "scaling")?;
        let features = self.features.as_ref().ok_or(ordering("scaling"))?;
        let normalized = self.normalized.as_ref().ok_or(ordering("scaling"))?;

        if features.is_empty() {
            return Err(PipelineError::InsufficientFeatures(
                "no variable genes to scale".into(),
            ));
        }

        let nn = self.num_cells();
        let mut covariates = Mat::zeros(nn, params.regress_out.len());
        for (k, name) in params.regress_out.iter().enumerate() {
            let values = self.cell_covariate(name)?;
            covariates.column_mut(k).copy_from_slice(&values);
        }

        let expr = dense_features(normalized, &features.genes);
        let scaled = regress_and_scale(&expr, &covariates, params.clip_max)?;

        self.clear_from(Stage::Scaled);
        self.scaled = Some(scaled);
        Ok(())
    }

    pub fn run_pca(&mut self, params: &PcaParams) -> Result<()> {
        self.require(Stage::Scaled, "PCA")?;
        let scaled = self.scaled.as_ref().ok_or(ordering("PCA"))?;
        let result = pca::run_pca(scaled, params.n_components, params.solver)?;

        self.clear_from(Stage::Reduced);
        self.pca = Some(result);
        self.pca_version = self.version;
        Ok(())
    }

    /// Build (or reuse) the neighbour graph and assign clusters
    pub fn cluster(&mut self, params: &ClusterParams) -> Result<&ClusterResult> {
        self.require(Stage::Reduced, "clustering")?;
        let pca = self.pca.as_ref().ok_or(ordering("clustering"))?;

        let new_graph = if params.reuse_graph {
            let stored = self.graph.as_ref().ok_or(PipelineError::Ordering(
                "no stored neighbour graph to reuse".into(),
            ))?;
            if stored.dims != params.dims {
                return Err(PipelineError::GraphMismatch(format!(
                    "graph built on {} dimensions, {} requested",
                    stored.dims, params.dims
                )));
            }
            if stored.cells != self.cells {
                return Err(PipelineError::GraphMismatch(format!(
                    "graph built on {} cells, the dataset now has {} different cells",
                    stored.cells.len(),
                    self.cells.len()
                )));
            }
            if stored.pca_version != self.pca_version {
                return Err(PipelineError::GraphMismatch(
                    "graph built on principal components that were since recomputed".into(),
                ));
            }
            None
        } else {
            Some(StoredGraph {
                snn: build_snn_graph(&pca.scores, params)?,
                dims: params.dims,
                cells: self.cells.clone(),
                pca_version: self.pca_version,
            })
        };

        let graph = match new_graph.as_ref() {
            Some(g) => &g.snn,
            None => &self.graph.as_ref().ok_or(ordering("clustering"))?.snn,
        };
        let result = louvain_clustering(graph, params.resolution, params.seed, params.n_start)?;
        info!("\n{}", result.histogram_ascii(50, 20));

        if let Some(g) = new_graph {
            self.graph = Some(g);
        }
        self.version += 1;
        Ok(self.clusters.insert(result))
    }

    pub fn embed_tsne(&mut self, params: &TsneParams) -> Result<&Mat> {
        self.require(Stage::Reduced, "t-SNE")?;
        let pca = self.pca.as_ref().ok_or(ordering("t-SNE"))?;
        let embedding = run_tsne(&pca.scores, params)?;

        self.version += 1;
        Ok(self.embedding.insert(embedding))
    }

    /// Differential expression between two groups of surviving cells.
    /// Explicit cell lists hold raw cell indices.
    pub fn find_markers(
        &self,
        target: &CellGroup,
        comparison: &Comparison,
        params: &MarkerParams,
    ) -> Result<MarkerTable> {
        self.require(Stage::Normalized, "marker detection")?;
        let normalized = self.normalized.as_ref().ok_or(ordering("marker detection"))?;

        let target = match target {
            CellGroup::Cells(cells) => CellGroup::Cells(self.positions_of(cells)?),
            other => other.clone(),
        };
        let comparison = match comparison {
            Comparison::Cells(cells) => Comparison::Cells(self.positions_of(cells)?),
            other => other.clone(),
        };

        let labels = self.clusters.as_ref().map(|c| c.labels.as_slice());
        let (a, b) = markers::resolve_groups(&target, &comparison, labels, self.num_cells())?;

        let cluster = match target {
            CellGroup::Cluster(k) => Some(k),
            CellGroup::Cells(_) => None,
        };
        markers::find_markers(normalized, &self.counts.genes, &a, &b, params, cluster)
    }

    /// Markers of every cluster against the rest
    pub fn find_all_markers(&self, params: &MarkerParams) -> Result<MarkerTable> {
        let normalized = self.normalized.as_ref().ok_or(ordering("marker detection"))?;
        let clusters = self
            .clusters
            .as_ref()
            .ok_or(PipelineError::Ordering("markers of all clusters need a clustering".into()))?;
        markers::find_all_markers(normalized, &self.counts.genes, &clusters.labels, params)
    }

    /// Positions among the surviving cells of raw cell indices
    fn positions_of(&self, raw_cells: &[usize]) -> Result<Vec<usize>> {
        let mut position = vec![None; self.raw.num_cells()];
        self.cells
            .iter()
            .enumerate()
            .for_each(|(pos, &j)| position[j] = Some(pos));

        raw_cells
            .iter()
            .map(|&j| {
                position.get(j).copied().flatten().ok_or_else(|| {
                    PipelineError::Data(format!("cell {} is not among the surviving cells", j))
                })
            })
            .collect()
    }

    fn require(&self, stage: Stage, what: &str) -> Result<()> {
        if self.stage() < stage {
            return Err(PipelineError::Ordering(format!(
                "{} needs the {:?} stage, the dataset is {:?}",
                what,
                stage,
                self.stage()
            )));
        }
        Ok(())
    }

    /// Drop results derived at or after `stage` and bump the version.
    /// A stored graph is kept; it carries its own cells, dimensions and
    /// PCA version.
    fn clear_from(&mut self, stage: Stage) {
        if stage <= Stage::Normalized {
            self.normalized = None;
            self.scale_factor = None;
        }
        if stage <= Stage::FeaturesSelected {
            self.features = None;
        }
        if stage <= Stage::Scaled {
            self.scaled = None;
        }
        if stage <= Stage::Reduced {
            self.pca = None;
            self.clusters = None;
            self.embedding = None;
        }
        self.version += 1;
    }
}

fn ordering(what: &str) -> PipelineError {
    PipelineError::Ordering(format!("{} invoked before its inputs exist", what))
}

/// Dense cells x features copy of the selected rows of genes x cells data
fn dense_features(normalized: &CscMat, features: &[usize]) -> Mat {
    let mut position = vec![None; normalized.nrows()];
    features
        .iter()
        .enumerate()
        .for_each(|(f, &g)| position[g] = Some(f));

    let mut ret = Mat::zeros(normalized.ncols(), features.len());
    for (i, j, &x) in normalized.triplet_iter() {
        if let Some(f) = position[i] {
            ret[(j, f)] = x;
        }
    }
    ret
}
