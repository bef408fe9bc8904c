use lentil_data::mtx_dir::*;
use lentil_data::qc::*;
use lentil_data::simulate::*;

#[test]
fn simulate_write_and_read_back() -> anyhow::Result<()> {
    let args = SimArgs {
        cells: 50,
        genes: 80,
        groups: 2,
        markers: 10,
        mito_genes: 5,
        depth: 500.0,
        ..Default::default()
    };

    let sim = generate_grouped_poisson_data(&args)?;

    let dir = tempfile::tempdir()?;
    let dir_str = dir.path().to_str().unwrap();
    write_10x_dir(&sim.data, dir_str)?;

    let data = read_10x_dir(dir_str)?;
    assert_eq!(data.genes, sim.data.genes);
    assert_eq!(data.barcodes, sim.data.barcodes);
    assert_eq!(data.to_triplets(), sim.data.to_triplets());

    Ok(())
}

#[test]
fn simulated_mito_fraction() -> anyhow::Result<()> {
    let args = SimArgs {
        cells: 30,
        genes: 50,
        groups: 2,
        markers: 5,
        mito_genes: 5,
        ..Default::default()
    };
    let sim = generate_grouped_poisson_data(&args)?;

    let mito = mito_gene_indices(&sim.data.genes, "MT-");
    assert_eq!(mito, vec![0, 1, 2, 3, 4]);

    let stats = collect_qc_stats(&sim.data, Some(&mito));
    let frac = stats.mito_fraction.unwrap();
    assert!(frac.iter().all(|&f| (0.0..1.0).contains(&f)));
    assert!(stats.total_counts.iter().all(|&x| x > 0.0));
    Ok(())
}
