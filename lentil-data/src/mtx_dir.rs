use crate::count_matrix::CountMatrix;

use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use log::info;
use matrix_util::common_io::*;
use matrix_util::mtx_io::{read_mtx_triplets, write_mtx_triplets};

pub const MTX_FILE: &str = "matrix.mtx";
pub const BARCODES_FILE: &str = "barcodes.tsv";
pub const FEATURES_FILE: &str = "features.tsv";
pub const GENES_FILE: &str = "genes.tsv";

/// Read a 10x-style directory holding `matrix.mtx`, `barcodes.tsv`
/// and `features.tsv` (or `genes.tsv`), each optionally gzipped
///
/// Gene symbols come from the second column of the feature file when
/// present. Repeated symbols are made unique by appending `.1`, `.2`,
/// ... to the later copies; repeated barcodes are an error.
pub fn read_10x_dir(dir: &str) -> anyhow::Result<CountMatrix> {
    let mtx_file = find_file_in_dir(dir, &[MTX_FILE])?;
    let barcode_file = find_file_in_dir(dir, &[BARCODES_FILE])?;
    let feature_file = find_file_in_dir(dir, &[FEATURES_FILE, GENES_FILE])?;

    let barcodes: Vec<Box<str>> = read_lines_of_words(&barcode_file, &['\t'])?
        .into_iter()
        .filter_map(|words| words.into_iter().next())
        .collect();

    let mut seen = HashSet::default();
    for b in barcodes.iter() {
        if !seen.insert(b.clone()) {
            return Err(anyhow::anyhow!(
                "duplicate barcode {} in {}",
                b,
                barcode_file
            ));
        }
    }

    let symbols: Vec<Box<str>> = read_lines_of_words(&feature_file, &['\t'])?
        .into_iter()
        .filter_map(|words| {
            let mut it = words.into_iter();
            let first = it.next();
            it.next().or(first)
        })
        .collect();
    let genes = make_names_unique(symbols);

    let (triplets, shape) = read_mtx_triplets(&mtx_file)?;

    if shape.nrow != genes.len() || shape.ncol != barcodes.len() {
        return Err(anyhow::anyhow!(
            "{} is {} x {}, but found {} features and {} barcodes",
            mtx_file,
            shape.nrow,
            shape.ncol,
            genes.len(),
            barcodes.len()
        ));
    }

    info!(
        "read {} genes x {} cells, {} non-zero elements from {}",
        shape.nrow,
        shape.ncol,
        triplets.len(),
        dir
    );

    CountMatrix::from_triplets(&triplets, genes, barcodes)
}

/// Write the count matrix as a 10x-style directory with gzipped files
pub fn write_10x_dir(data: &CountMatrix, dir: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;

    let path = |name: &str| -> anyhow::Result<String> {
        std::path::Path::new(dir)
            .join(format!("{}.gz", name))
            .to_str()
            .map(|s| s.to_string())
            .ok_or(anyhow::anyhow!("non-utf8 path in {}", dir))
    };

    let features: Vec<Box<str>> = data
        .genes
        .iter()
        .map(|g| format!("{}\t{}\tGene Expression", g, g).into_boxed_str())
        .collect();

    write_lines(&data.barcodes, &path(BARCODES_FILE)?)?;
    write_lines(&features, &path(FEATURES_FILE)?)?;
    write_mtx_triplets(
        &data.to_triplets(),
        data.num_genes(),
        data.num_cells(),
        &path(MTX_FILE)?,
    )?;

    info!("wrote {} genes x {} cells to {}", data.num_genes(), data.num_cells(), dir);
    Ok(())
}

/// Make repeated names unique by appending `.1`, `.2`, ... to later copies
pub fn make_names_unique(names: Vec<Box<str>>) -> Vec<Box<str>> {
    let mut taken: HashSet<Box<str>> = names.iter().cloned().collect();
    let mut count: HashMap<Box<str>, usize> = HashMap::default();
    let mut first_seen: HashSet<Box<str>> = HashSet::default();

    names
        .into_iter()
        .map(|name| {
            if first_seen.insert(name.clone()) {
                return name;
            }
            let k = count.entry(name.clone()).or_insert(0);
            loop {
                *k += 1;
                let candidate: Box<str> = format!("{}.{}", name, k).into();
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}
