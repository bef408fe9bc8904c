use crate::traits::SampleOps;
use log::debug;
use nalgebra::{DMatrix, DVector};

type Mat = DMatrix<f32>;
type Vec = DVector<f32>;

pub trait RSVD {
    /// Truncated SVD `X ~ U diag(d) V'` of the given rank
    fn rsvd(&self, rank: usize, seed: u64) -> anyhow::Result<(Mat, Vec, Mat)>;
}

impl RSVD for Mat {
    fn rsvd(&self, rank: usize, seed: u64) -> anyhow::Result<(Mat, Vec, Mat)> {
        let default_iter = 5;
        let mut rsvd = RandomizedSVD::new(rank, default_iter).with_seed(seed);
        rsvd.compute(self)?;
        Ok((
            rsvd.matrix_u().clone(),
            rsvd.singular_values().clone(),
            rsvd.matrix_v().clone(),
        ))
    }
}

/// Randomized SVD
///
/// Alg 4.4 of Halko et al. (2009): a Gaussian test matrix, `iter`
/// rounds of power iteration with QR re-orthonormalization after each
/// multiplication, then an exact SVD of the small projected matrix.
///
pub struct RandomizedSVD {
    max_rank: usize,
    iter: usize,
    oversample: usize,
    seed: u64,
    u_vectors: Mat,
    singular_values: Vec,
    v_vectors: Mat,
}

impl RandomizedSVD {
    pub fn new(max_rank: usize, iter: usize) -> Self {
        Self {
            max_rank,
            iter,
            oversample: 10,
            seed: 42,
            u_vectors: Mat::zeros(0, 0),
            singular_values: Vec::zeros(0),
            v_vectors: Mat::zeros(0, 0),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_oversample(mut self, oversample: usize) -> Self {
        self.oversample = oversample;
        self
    }

    pub fn matrix_u(&self) -> &Mat {
        &self.u_vectors
    }

    pub fn matrix_v(&self) -> &Mat {
        &self.v_vectors
    }

    pub fn singular_values(&self) -> &Vec {
        &self.singular_values
    }

    pub fn compute(&mut self, xx: &Mat) -> anyhow::Result<()> {
        let nr = xx.nrows();
        let nc = xx.ncols();
        let full_rank = nr.min(nc);

        if full_rank == 0 {
            anyhow::bail!("empty matrix [{} x {}]", nr, nc);
        }

        let rank = if self.max_rank > 0 {
            self.max_rank.min(full_rank)
        } else {
            full_rank
        };

        let sketch = (rank + self.oversample).min(full_rank);
        let qq = self.rand_subspace_iteration(xx, sketch);

        let bb = qq.transpose() * xx;
        debug!("final svd on [{} x {}]", bb.nrows(), bb.ncols());

        let svd = bb.svd(true, true);

        let (Some(svd_u), Some(svd_vt)) = (svd.u, svd.v_t) else {
            anyhow::bail!("SVD failed on [{} x {}]", nr, nc);
        };

        // nalgebra does not promise a sorted spectrum
        let mut order: std::vec::Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));
        order.truncate(rank);

        let uu = qq * svd_u;
        let vv = svd_vt.transpose();

        self.u_vectors = Mat::from_fn(nr, order.len(), |i, k| uu[(i, order[k])]);
        self.v_vectors = Mat::from_fn(nc, order.len(), |j, k| vv[(j, order[k])]);
        self.singular_values = Vec::from_iterator(
            order.len(),
            order.iter().map(|&k| svd.singular_values[k]),
        );

        Ok(())
    }

    // Find an orthonormal matrix qq whose range approximates the range of xx
    fn rand_subspace_iteration(&self, xx: &Mat, sketch: usize) -> Mat {
        let omega = Mat::rnorm(xx.ncols(), sketch, Some(self.seed));
        let mut qq = orthonormal_basis(&(xx * omega), sketch);

        for i in 0..self.iter {
            let zz = orthonormal_basis(&(xx.transpose() * &qq), sketch);
            qq = orthonormal_basis(&(xx * zz), sketch);
            debug!("power iteration {:>3}", i + 1);
        }

        debug!("found Q [{} x {}]", qq.nrows(), qq.ncols());
        qq
    }
}

fn orthonormal_basis(yy: &Mat, kk: usize) -> Mat {
    let qr = yy.clone().qr();
    let q = qr.q();
    let kk = kk.min(q.ncols());
    q.columns(0, kk).into_owned()
}
