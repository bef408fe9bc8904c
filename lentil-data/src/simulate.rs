use crate::count_matrix::CountMatrix;

use indicatif::ParallelProgressIterator;
use log::info;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma, LogNormal, Poisson};
use rayon::prelude::*;

pub struct SimArgs {
    pub cells: usize,
    pub genes: usize,
    pub groups: usize,
    /// number of up-regulated genes per group
    pub markers: usize,
    /// number of mitochondrial genes (named `MT-...`)
    pub mito_genes: usize,
    /// expected total count per cell
    pub depth: f32,
    /// multiplicative increase of marker genes in their group
    pub fold_change: f32,
    pub rseed: u64,
}

impl Default for SimArgs {
    fn default() -> Self {
        Self {
            cells: 300,
            genes: 500,
            groups: 3,
            markers: 20,
            mito_genes: 10,
            depth: 2000.0,
            fold_change: 8.0,
            rseed: 42,
        }
    }
}

pub struct SimOut {
    pub data: CountMatrix,
    /// true group of each cell
    pub membership: Vec<usize>,
    /// marker genes of each group
    pub group_markers: Vec<Vec<usize>>,
}

/// Generate a count matrix of cells from distinct groups
///
/// ```text
/// Y(g,j) ~ Poisson( L(j) * rho(g, G(j)) )
/// rho(g,k) ∝ beta(g) * (fold_change if g is a marker of group k)
/// L(j) ~ LogNormal(ln(depth), 0.3), beta(g) ~ Gamma(1, 1)
/// ```
///
/// The first `mito_genes` genes are mitochondrial; marker genes follow
/// them in consecutive blocks of `markers` genes per group.
pub fn generate_grouped_poisson_data(args: &SimArgs) -> anyhow::Result<SimOut> {
    let nn = args.cells;
    let dd = args.genes;
    let kk = args.groups.max(1);

    if args.mito_genes + kk * args.markers > dd {
        return Err(anyhow::anyhow!(
            "{} genes cannot hold {} mitochondrial and {} x {} marker genes",
            dd,
            args.mito_genes,
            kk,
            args.markers
        ));
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(args.rseed);

    // 1. group membership and library sizes
    let membership: Vec<usize> = (0..nn).map(|_| rng.random_range(0..kk)).collect();

    let lib_size = LogNormal::new((args.depth.max(1.0) as f64).ln(), 0.3)?;
    let depth_n: Vec<f64> = (0..nn).map(|_| lib_size.sample(&mut rng)).collect();

    // 2. gene-by-group expression profiles
    let gamma = Gamma::new(1.0, 1.0)?;
    let beta_d: Vec<f64> = (0..dd).map(|_| gamma.sample(&mut rng)).collect();

    let group_markers: Vec<Vec<usize>> = (0..kk)
        .map(|k| {
            let lb = args.mito_genes + k * args.markers;
            (lb..(lb + args.markers)).collect()
        })
        .collect();

    let rho_kd: Vec<Vec<f64>> = group_markers
        .iter()
        .map(|markers| {
            let mut rho = beta_d.clone();
            for &g in markers {
                rho[g] *= args.fold_change as f64;
            }
            let denom: f64 = rho.iter().sum();
            rho.iter().map(|x| x / denom).collect()
        })
        .collect();

    info!("simulated {} group profiles over {} genes", kk, dd);

    // 3. sample counts cell by cell with cell-specific seeds
    let cell_seeds: Vec<u64> = (0..nn).map(|_| rng.random()).collect();

    let triplets = (0..nn)
        .into_par_iter()
        .progress_count(nn as u64)
        .map(|j| -> anyhow::Result<Vec<(u64, u64, f32)>> {
            let mut rng_j = rand::rngs::StdRng::seed_from_u64(cell_seeds[j]);
            let rho = &rho_kd[membership[j]];
            let mut ret = vec![];
            for (g, &r) in rho.iter().enumerate() {
                let lambda = depth_n[j] * r;
                if lambda <= 0.0 {
                    continue;
                }
                let y: f64 = Poisson::new(lambda)?.sample(&mut rng_j);
                if y > 0.0 {
                    ret.push((g as u64, j as u64, y as f32));
                }
            }
            Ok(ret)
        })
        .collect::<anyhow::Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    info!("sampled {} non-zero elements", triplets.len());

    let genes: Vec<Box<str>> = (0..dd)
        .map(|g| {
            let name = if g < args.mito_genes {
                format!("MT-{}", g + 1)
            } else {
                format!("gene{}", g + 1)
            };
            name.into_boxed_str()
        })
        .collect();

    let barcodes: Vec<Box<str>> = (0..nn)
        .map(|j| format!("cell{}-{}", j + 1, membership[j]).into_boxed_str())
        .collect();

    Ok(SimOut {
        data: CountMatrix::from_triplets(&triplets, genes, barcodes)?,
        membership,
        group_markers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulation_is_seeded() -> anyhow::Result<()> {
        let args = SimArgs {
            cells: 40,
            genes: 60,
            groups: 2,
            markers: 5,
            mito_genes: 3,
            ..Default::default()
        };
        let a = generate_grouped_poisson_data(&args)?;
        let b = generate_grouped_poisson_data(&args)?;

        assert_eq!(a.data.num_cells(), 40);
        assert_eq!(a.data.num_genes(), 60);
        assert_eq!(a.membership, b.membership);
        assert_eq!(a.data.to_triplets(), b.data.to_triplets());
        assert_eq!(a.data.genes[0].as_ref(), "MT-1");
        assert_eq!(a.group_markers[1], (8..13).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_too_many_markers() {
        let args = SimArgs {
            genes: 10,
            ..Default::default()
        };
        assert!(generate_grouped_poisson_data(&args).is_err());
    }
}
