use anyhow::{Context, Result};
use sightline_vision::{check_model_file, LabelTable};
use tracing::info;

use crate::config::{AssetsConfig, PipelineConfig};

pub fn check_pipeline(cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    info!("doctor: pipeline input {}x{}", cfg.input_size, cfg.input_size);
    Ok(())
}

/// Model present and non-empty, labels parse. Returns the label count.
pub fn check_assets(assets: &AssetsConfig) -> Result<usize> {
    anyhow::ensure!(assets.threads >= 1, "assets.threads must be >= 1");
    let bytes = check_model_file(&assets.model_path)
        .with_context(|| format!("model {}", assets.model_path.display()))?;
    info!("doctor: model {} ({} bytes)", assets.model_path.display(), bytes);

    let labels = LabelTable::load(&assets.labels_path)
        .with_context(|| format!("labels {}", assets.labels_path.display()))?;
    info!("doctor: {} labels", labels.len());
    Ok(labels.len())
}
