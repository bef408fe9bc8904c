#![allow(dead_code)]

pub use log::{info, warn};

pub type Mat = nalgebra::DMatrix<f32>;
pub type DVec = nalgebra::DVector<f32>;
pub type CscMat = nalgebra_sparse::CscMatrix<f32>;

pub use crate::error::{PipelineError, Result};

pub use lentil_data::count_matrix::CountMatrix;

/// Warn once that a randomized stage runs without a seed
pub fn warn_if_unseeded(stage: &str, seed: Option<u64>) {
    if seed.is_none() {
        warn!("{}: no seed given, the result is not reproducible", stage);
    }
}
