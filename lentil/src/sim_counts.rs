use clap::Args;
use lentil_data::mtx_dir::write_10x_dir;
use lentil_data::simulate::{generate_grouped_poisson_data, SimArgs};
use log::info;
use matrix_util::common_io::write_lines;

#[derive(Args, Debug, Clone)]
pub struct SimArgsCli {
    /// output 10x directory
    #[arg(long, short, required = true)]
    out: Box<str>,

    /// number of cells
    #[arg(short = 'c', long, default_value_t = 300)]
    cells: usize,

    /// number of genes
    #[arg(short = 'g', long, default_value_t = 500)]
    genes: usize,

    /// number of cell groups
    #[arg(short = 'k', long, default_value_t = 3)]
    groups: usize,

    /// number of marker genes per group
    #[arg(long, default_value_t = 20)]
    markers: usize,

    /// number of mitochondrial genes
    #[arg(long, default_value_t = 10)]
    mito_genes: usize,

    /// expected total count per cell
    #[arg(short, long, default_value_t = 2000.)]
    depth: f32,

    /// fold change of marker genes
    #[arg(long, default_value_t = 8.)]
    fold_change: f32,

    /// random seed
    #[arg(long, default_value_t = 42)]
    rseed: u64,

    /// verbose output
    #[arg(long, short)]
    verbose: bool,
}

impl From<&SimArgsCli> for SimArgs {
    fn from(cli: &SimArgsCli) -> Self {
        SimArgs {
            cells: cli.cells,
            genes: cli.genes,
            groups: cli.groups,
            markers: cli.markers,
            mito_genes: cli.mito_genes,
            depth: cli.depth,
            fold_change: cli.fold_change,
            rseed: cli.rseed,
        }
    }
}

/// Simulate counts and write them with the true groups and markers
///
/// * `{out}/matrix.mtx.gz`, `{out}/barcodes.tsv.gz`, `{out}/features.tsv.gz`
/// * `{out}/membership.tsv.gz`: barcode and group of each cell
/// * `{out}/markers.tsv.gz`: group and gene name of each marker
pub fn simulate_counts(args: &SimArgsCli) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    info!("Simulating counts...");
    let sim_args: SimArgs = args.into();
    let sim = generate_grouped_poisson_data(&sim_args)?;
    write_10x_dir(&sim.data, &args.out)?;

    let path = |name: &str| -> anyhow::Result<String> {
        std::path::Path::new(&*args.out)
            .join(name)
            .to_str()
            .map(|s| s.to_string())
            .ok_or(anyhow::anyhow!("non-utf8 path in {}", args.out))
    };

    let membership: Vec<Box<str>> = sim
        .data
        .barcodes
        .iter()
        .zip(sim.membership.iter())
        .map(|(b, k)| format!("{}\t{}", b, k).into_boxed_str())
        .collect();
    write_lines(&membership, &path("membership.tsv.gz")?)?;

    let markers: Vec<Box<str>> = sim
        .group_markers
        .iter()
        .enumerate()
        .flat_map(|(k, genes)| {
            genes
                .iter()
                .map(move |&g| (k, g))
                .collect::<Vec<_>>()
        })
        .map(|(k, g)| format!("{}\t{}", k, sim.data.genes[g]).into_boxed_str())
        .collect();
    write_lines(&markers, &path("markers.tsv.gz")?)?;

    info!(
        "{} cells x {} genes in {} groups",
        sim.data.num_cells(),
        sim.data.num_genes(),
        args.groups
    );
    Ok(())
}
