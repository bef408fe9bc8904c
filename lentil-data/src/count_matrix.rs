use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Raw counts of genes (rows) by cells (columns) with their names
///
/// Each column of `counts` holds one cell, in the same layout as a
/// 10x `matrix.mtx` file.
#[derive(Clone, Debug)]
pub struct CountMatrix {
    pub counts: CscMatrix<f32>,
    pub genes: Vec<Box<str>>,
    pub barcodes: Vec<Box<str>>,
}

impl CountMatrix {
    /// Build a count matrix from 0-based `(gene, cell, count)` triplets;
    /// duplicated coordinates are summed
    pub fn from_triplets(
        triplets: &[(u64, u64, f32)],
        genes: Vec<Box<str>>,
        barcodes: Vec<Box<str>>,
    ) -> anyhow::Result<Self> {
        let (nrow, ncol) = (genes.len(), barcodes.len());

        let mut rows = Vec::with_capacity(triplets.len());
        let mut cols = Vec::with_capacity(triplets.len());
        let mut vals = Vec::with_capacity(triplets.len());

        for &(i, j, x) in triplets {
            if !x.is_finite() || x < 0.0 {
                return Err(anyhow::anyhow!(
                    "invalid count {} at gene {}, cell {}",
                    x,
                    i,
                    j
                ));
            }
            if x > 0.0 {
                rows.push(i as usize);
                cols.push(j as usize);
                vals.push(x);
            }
        }

        let coo = CooMatrix::try_from_triplets(nrow, ncol, rows, cols, vals)
            .map_err(|e| anyhow::anyhow!("{} genes x {} cells: {}", nrow, ncol, e))?;

        Self::new(CscMatrix::from(&coo), genes, barcodes)
    }

    /// Build a count matrix from dense per-cell count vectors
    pub fn from_cells(
        cells: &[Vec<f32>],
        genes: Vec<Box<str>>,
        barcodes: Vec<Box<str>>,
    ) -> anyhow::Result<Self> {
        let mut triplets = vec![];
        for (j, cell) in cells.iter().enumerate() {
            if cell.len() != genes.len() {
                return Err(anyhow::anyhow!(
                    "cell {} has {} values for {} genes",
                    j,
                    cell.len(),
                    genes.len()
                ));
            }
            for (i, &x) in cell.iter().enumerate() {
                triplets.push((i as u64, j as u64, x));
            }
        }
        Self::from_triplets(&triplets, genes, barcodes)
    }

    pub fn new(
        counts: CscMatrix<f32>,
        genes: Vec<Box<str>>,
        barcodes: Vec<Box<str>>,
    ) -> anyhow::Result<Self> {
        if counts.nrows() != genes.len() || counts.ncols() != barcodes.len() {
            return Err(anyhow::anyhow!(
                "{} x {} counts with {} genes and {} barcodes",
                counts.nrows(),
                counts.ncols(),
                genes.len(),
                barcodes.len()
            ));
        }
        Ok(Self {
            counts,
            genes,
            barcodes,
        })
    }

    pub fn num_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn num_cells(&self) -> usize {
        self.counts.ncols()
    }

    /// Non-zero gene indices and counts of one cell
    pub fn cell(&self, j: usize) -> (&[usize], &[f32]) {
        let offsets = self.counts.col_offsets();
        let (start, end) = (offsets[j], offsets[j + 1]);
        (
            &self.counts.row_indices()[start..end],
            &self.counts.values()[start..end],
        )
    }

    pub fn gene_index(&self, gene: &str) -> Option<usize> {
        self.genes.iter().position(|g| g.as_ref() == gene)
    }

    /// Keep the selected cells and genes, in the given order
    pub fn subset(&self, cells: &[usize], genes: &[usize]) -> anyhow::Result<Self> {
        let mut new_row: Vec<Option<usize>> = vec![None; self.num_genes()];
        for (new_i, &i) in genes.iter().enumerate() {
            if i >= self.num_genes() {
                return Err(anyhow::anyhow!("gene index {} out of range", i));
            }
            new_row[i] = Some(new_i);
        }

        let mut offsets = Vec::with_capacity(cells.len() + 1);
        let mut row_indices = vec![];
        let mut values = vec![];
        offsets.push(0);

        for &j in cells {
            if j >= self.num_cells() {
                return Err(anyhow::anyhow!("cell index {} out of range", j));
            }
            let (rows, vals) = self.cell(j);
            let mut entries: Vec<(usize, f32)> = rows
                .iter()
                .zip(vals.iter())
                .filter_map(|(&i, &x)| new_row[i].map(|r| (r, x)))
                .collect();
            entries.sort_unstable_by_key(|&(r, _)| r);
            for (r, x) in entries {
                row_indices.push(r);
                values.push(x);
            }
            offsets.push(row_indices.len());
        }

        let counts =
            CscMatrix::try_from_csc_data(genes.len(), cells.len(), offsets, row_indices, values)
                .map_err(|e| anyhow::anyhow!("subset {} genes x {} cells: {}", genes.len(), cells.len(), e))?;

        Self::new(
            counts,
            genes.iter().map(|&i| self.genes[i].clone()).collect(),
            cells.iter().map(|&j| self.barcodes[j].clone()).collect(),
        )
    }

    /// 0-based `(gene, cell, count)` triplets sorted by cell then gene
    pub fn to_triplets(&self) -> Vec<(u64, u64, f32)> {
        self.counts
            .triplet_iter()
            .map(|(i, j, &x)| (i as u64, j as u64, x))
            .collect()
    }
}
