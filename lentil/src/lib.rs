pub mod cluster;
pub mod common;
pub mod dataset;
pub mod diff_test;
pub mod enrichment;
pub mod error;
pub mod feature_selection;
pub mod markers;
pub mod normalize;
pub mod output;
pub mod params;
pub mod pca;
pub mod pipeline;
pub mod scale;
pub mod tsne;

pub use dataset::{Dataset, DatasetView, Stage};
pub use error::{PipelineError, Result};
pub use params::PipelineParams;
pub use pipeline::{run_pipeline, PipelineOutput};
