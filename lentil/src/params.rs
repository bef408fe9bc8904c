use crate::cluster::ClusterParams;
use crate::feature_selection::FeatureSelectionParams;
use crate::markers::MarkerParams;
use crate::normalize::NormalizeParams;
use crate::pca::PcaParams;
use crate::scale::ScaleParams;
use crate::tsne::TsneParams;

use lentil_data::qc::QcThresholds;
use matrix_util::common_io::{open_buf_reader, open_buf_writer};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Parameters of every pipeline stage
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    pub qc: QcThresholds,
    pub normalize: NormalizeParams,
    pub features: FeatureSelectionParams,
    pub scale: ScaleParams,
    pub pca: PcaParams,
    pub cluster: ClusterParams,
    pub tsne: TsneParams,
    pub markers: MarkerParams,
    pub skip_tsne: bool,
    pub skip_markers: bool,
}

impl PipelineParams {
    /// Read parameters from a JSON file; missing fields take defaults
    pub fn from_json_file(file: &str) -> anyhow::Result<Self> {
        let reader = open_buf_reader(file)?;
        let params = serde_json::from_reader(reader)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", file, e))?;
        Ok(params)
    }

    pub fn to_json_file(&self, file: &str) -> anyhow::Result<()> {
        let mut writer = open_buf_writer(file)?;
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}
