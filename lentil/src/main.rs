mod run_clustering;
mod sim_counts;

use run_clustering::*;
use sim_counts::*;

use clap::{Parser, Subcommand};
use log::info;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LENTIL",
    long_about = "Clustering and marker discovery for single-cell count data\n\
		  Input: a 10x directory with `matrix.mtx`, `barcodes.tsv`\n\
		  and `features.tsv` (or `genes.tsv`), optionally gzipped."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Cluster cells and find marker genes",
        long_about = "Run the whole pipeline on one 10x directory:\n\
		      (1) Filter cells and genes by quality control thresholds\n\
		      (2) Log-normalize and select highly variable genes\n\
		      (3) Regress out covariates, scale, and reduce by PCA\n\
		      (4) Cluster a shared-nearest-neighbour graph (Louvain)\n\
		      (5) Embed cells by t-SNE and test markers of each cluster.\n"
    )]
    Run(RunArgs),

    #[command(
        about = "Simulate a count matrix with cell groups",
        long_about = "Sample Poisson counts of cells from distinct groups,\n\
		      each with its own up-regulated marker genes,\n\
		      and write them as a 10x directory.\n"
    )]
    Simulate(SimArgsCli),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Run(args) => {
            run_clustering(args)?;
        }
        Commands::Simulate(args) => {
            simulate_counts(args)?;
        }
    }

    info!("Done");
    Ok(())
}
