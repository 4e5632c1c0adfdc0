use std::path::PathBuf;

use serde::Deserialize;
use sightline_vision::Normalization;

use crate::StartupError;

/// Processing parameters, fixed for the lifetime of a pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub confidence_threshold: f32,
    /// Side of the square model input.
    pub input_size: u32,
    pub norm_mean: f32,
    pub norm_std: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let norm = Normalization::default();
        Self {
            confidence_threshold: 0.5,
            input_size: 320,
            norm_mean: norm.mean,
            norm_std: norm.std,
        }
    }
}

impl PipelineConfig {
    pub fn normalization(&self) -> Normalization {
        Normalization {
            mean: self.norm_mean,
            std: self.norm_std,
        }
    }

    pub fn validate(&self) -> Result<(), StartupError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(StartupError::Config(format!(
                "pipeline.confidence_threshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.input_size == 0 {
            return Err(StartupError::Config("pipeline.input_size must be positive".into()));
        }
        if !self.norm_mean.is_finite() {
            return Err(StartupError::Config("pipeline.norm_mean must be finite".into()));
        }
        if !(self.norm_std.is_finite() && self.norm_std > 0.0) {
            return Err(StartupError::Config(format!(
                "pipeline.norm_std {} must be a positive number",
                self.norm_std
            )));
        }
        Ok(())
    }
}

/// Model and label files, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    /// Interpreter threads.
    #[serde(default = "default_threads")]
    pub threads: i32,
}

fn default_threads() -> i32 {
    2
}
