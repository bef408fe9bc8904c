use lentil::cluster::{GraphMetric, NeighbourSearch};
use lentil::diff_test::DeTest;
use lentil::feature_selection::HvgMethod;
use lentil::normalize::ScaleFactor;
use lentil::output::write_all;
use lentil::pca::PcaSolver;
use lentil::{run_pipeline, PipelineParams};

use clap::{Args, ValueEnum};
use lentil_data::mtx_dir::read_10x_dir;
use log::info;

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum HvgMethodCli {
    /// binned dispersion z-scores
    MeanVar,
    /// excess coefficient of variation over a Poisson-Gamma model
    PoissonGamma,
}

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum DeTestCli {
    Wilcox,
    T,
    Bimod,
}

impl From<DeTestCli> for DeTest {
    fn from(cli: DeTestCli) -> Self {
        match cli {
            DeTestCli::Wilcox => DeTest::RankSum,
            DeTestCli::T => DeTest::TTest,
            DeTestCli::Bimod => DeTest::Bimod,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(
        required = true,
        help = "10x data directory",
        long_help = "Directory with `matrix.mtx[.gz]`, `barcodes.tsv[.gz]`\n\
		     and `features.tsv[.gz]` or `genes.tsv[.gz]`.\n\
		     Gene symbols are taken from the second column."
    )]
    data_dir: Box<str>,

    #[arg(
        long,
        short = 'o',
        required = true,
        help = "Output file prefix",
        long_help = "Output file prefix.\n\n\
		     Generates:\n\
		     - {out}.qc.tsv.gz: per-cell counts, genes, mitochondrial %\n\
		     - {out}.features.tsv.gz: gene variability statistics\n\
		     - {out}.pca.tsv.gz, {out}.pca_variance.tsv.gz\n\
		     - {out}.clusters.tsv.gz: cluster of each cell\n\
		     - {out}.tsne.tsv.gz: two-dimensional embedding\n\
		     - {out}.markers.tsv.gz: markers of each cluster\n\
		     - {out}.params.json: parameters actually used"
    )]
    out: Box<str>,

    #[arg(
        long,
        short = 'p',
        help = "JSON file of pipeline parameters",
        long_help = "JSON file of pipeline parameters, e.g., a previous\n\
		     {out}.params.json. Missing fields take default values;\n\
		     command-line options override the file."
    )]
    params: Option<Box<str>>,

    #[arg(long, help = "Prefix of mitochondrial gene symbols, e.g., MT-")]
    mito_prefix: Option<String>,

    #[arg(long, help = "Minimum number of detected genes per cell")]
    min_genes: Option<usize>,

    #[arg(long, help = "Maximum number of detected genes per cell")]
    max_genes: Option<usize>,

    #[arg(long, help = "Minimum total count per cell")]
    min_counts: Option<f32>,

    #[arg(long, help = "Maximum total count per cell")]
    max_counts: Option<f32>,

    #[arg(
        long,
        help = "Maximum mitochondrial fraction per cell (0 to 1)",
        long_help = "Maximum fraction of counts on mitochondrial genes.\n\
		     Requires --mito-prefix."
    )]
    max_mito: Option<f32>,

    #[arg(long, help = "Minimum number of cells detecting a gene")]
    min_cells: Option<usize>,

    #[arg(long, help = "Target total count per cell [default: 1e4]")]
    scale_factor: Option<f32>,

    #[arg(
        long,
        help = "Use the median total count as the scale factor",
        conflicts_with = "scale_factor"
    )]
    median_total: bool,

    #[arg(long, value_enum, help = "Highly variable gene method [default: meanvar]")]
    hvg: Option<HvgMethodCli>,

    #[arg(long, help = "Keep at most this many variable genes")]
    max_features: Option<usize>,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Covariates to regress out (comma-separated)",
        long_help = "Per-cell covariates to regress out before scaling:\n\
		     n_counts, n_genes, percent_mito (needs --mito-prefix)"
    )]
    regress_out: Option<Vec<String>>,

    #[arg(long, help = "Number of principal components [default: 20]")]
    n_pcs: Option<usize>,

    #[arg(long, help = "Use randomized SVD with this many power iterations")]
    rsvd_iter: Option<usize>,

    #[arg(long, help = "Number of PCs for the graph and t-SNE [default: 10]")]
    dims: Option<usize>,

    #[arg(long, help = "Number of nearest neighbours, self included [default: 20]")]
    knn: Option<usize>,

    #[arg(long, help = "Use cosine distance for the neighbour graph")]
    cosine: bool,

    #[arg(long, help = "Approximate neighbour search (HNSW) for large data")]
    hnsw: bool,

    #[arg(long, help = "Resolution (higher = more clusters) [default: 1.0]")]
    resolution: Option<f64>,

    #[arg(long, help = "Random seed of every randomized stage")]
    seed: Option<u64>,

    #[arg(long, help = "t-SNE perplexity [default: 30]")]
    perplexity: Option<f32>,

    #[arg(long, help = "Largest number of cells for t-SNE [default: 10000]")]
    tsne_max_cells: Option<usize>,

    #[arg(long, value_enum, help = "Differential expression test [default: wilcox]")]
    test: Option<DeTestCli>,

    #[arg(long, help = "Report only up-regulated markers")]
    only_pos: bool,

    #[arg(long, help = "Skip the t-SNE embedding")]
    skip_tsne: bool,

    #[arg(long, help = "Skip marker detection")]
    skip_markers: bool,

    #[arg(long, help = "Number of threads [default: all cores]")]
    threads: Option<usize>,

    #[arg(long, short = 'v', help = "Verbose output")]
    verbose: bool,
}

impl RunArgs {
    /// Parameters from `--params` (or defaults) with the command-line
    /// options on top
    fn pipeline_params(&self) -> anyhow::Result<PipelineParams> {
        let mut params = match self.params.as_deref() {
            Some(file) => PipelineParams::from_json_file(file)?,
            None => PipelineParams::default(),
        };

        let qc = &mut params.qc;
        if self.mito_prefix.is_some() {
            qc.mito_prefix = self.mito_prefix.clone();
        }
        qc.min_genes = self.min_genes.or(qc.min_genes);
        qc.max_genes = self.max_genes.or(qc.max_genes);
        qc.min_counts = self.min_counts.or(qc.min_counts);
        qc.max_counts = self.max_counts.or(qc.max_counts);
        qc.max_mito_fraction = self.max_mito.or(qc.max_mito_fraction);
        qc.min_cells = self.min_cells.or(qc.min_cells);

        if let Some(sf) = self.scale_factor {
            params.normalize.scale_factor = ScaleFactor::Fixed(sf);
        }
        if self.median_total {
            params.normalize.scale_factor = ScaleFactor::MedianTotal;
        }

        match self.hvg {
            Some(HvgMethodCli::MeanVar) => {
                if !matches!(params.features.method, HvgMethod::MeanVarPlot { .. }) {
                    params.features.method = HvgMethod::default();
                }
            }
            Some(HvgMethodCli::PoissonGamma) => {
                if !matches!(params.features.method, HvgMethod::PoissonGammaCv { .. }) {
                    params.features.method = HvgMethod::PoissonGammaCv {
                        min_mean: 0.0125,
                        max_mean: 8.0,
                        n_sd: 1.0,
                    };
                }
            }
            None => {}
        }
        params.features.max_features = self.max_features.or(params.features.max_features);

        if let Some(covariates) = self.regress_out.as_ref() {
            params.scale.regress_out = covariates.clone();
        }

        params.pca.n_components = self.n_pcs.unwrap_or(params.pca.n_components);
        if let Some(iter) = self.rsvd_iter {
            params.pca.solver = PcaSolver::Randomized {
                iter,
                seed: self.seed.or(Some(42)),
            };
        }

        let cluster = &mut params.cluster;
        cluster.dims = self.dims.unwrap_or(cluster.dims);
        cluster.knn = self.knn.unwrap_or(cluster.knn);
        cluster.resolution = self.resolution.unwrap_or(cluster.resolution);
        if self.cosine {
            cluster.metric = GraphMetric::Cosine;
        }
        if self.hnsw {
            cluster.search = NeighbourSearch::Hnsw;
        }

        params.tsne.dims = self.dims.unwrap_or(params.tsne.dims);
        params.tsne.perplexity = self.perplexity.unwrap_or(params.tsne.perplexity);
        params.tsne.max_cells = self.tsne_max_cells.unwrap_or(params.tsne.max_cells);

        if let Some(seed) = self.seed {
            params.cluster.seed = Some(seed);
            params.tsne.seed = Some(seed);
            params.markers.seed = Some(seed);
        }

        if let Some(test) = self.test.clone() {
            params.markers.test = test.into();
        }
        params.markers.only_pos |= self.only_pos;
        params.skip_tsne |= self.skip_tsne;
        params.skip_markers |= self.skip_markers;

        Ok(params)
    }
}

pub fn run_clustering(args: &RunArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let nthreads = args.threads.unwrap_or_else(num_cpus::get).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(nthreads)
        .build_global()?;
    info!("using {} threads", nthreads);

    let params = args.pipeline_params()?;
    params.to_json_file(&format!("{}.params.json", args.out))?;

    let raw = read_10x_dir(&args.data_dir)?;
    let output = run_pipeline(raw, &params)?;

    write_all(&output.dataset, output.markers.as_ref(), &args.out)?;
    Ok(())
}
