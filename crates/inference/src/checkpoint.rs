//! Saved models: a Burn binary record next to a JSON run card describing how to
//! rebuild the network and feed it.

use crate::{InferenceError, InferenceResult};
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn_dataset::{Preprocess, Resolution, TransformPipeline, TransformPipelineBuilder};
use cli_support::Variant;
use data_contracts::ClassMap;
use models::{NetworkSpec, TransferNetConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const RUN_CARD_FILE: &str = "run_card.json";
/// Record file stem; the recorder appends `.bin`.
pub const MODEL_RECORD: &str = "model";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Architecture {
    Sequential { spec: NetworkSpec },
    Transfer { config: TransferNetConfig },
}

impl Architecture {
    pub fn describe(&self) -> String {
        match self {
            Architecture::Sequential { spec } => spec.describe(),
            Architecture::Transfer { config } => format!(
                "resnet(blocks={:?} width={}) > {}",
                config.backbone.blocks,
                config.backbone.base_width,
                config
                    .head_spec()
                    .map(|s| s.describe())
                    .unwrap_or_else(|e| format!("<invalid head: {e}>"))
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCard {
    pub variant: Variant,
    pub resolution: Resolution,
    pub preprocess: Preprocess,
    pub classes: ClassMap,
    pub architecture: Architecture,
    pub seed: u64,
    #[serde(default)]
    pub epochs_run: usize,
    #[serde(default)]
    pub best_epoch: Option<usize>,
    #[serde(default)]
    pub val_loss: Option<f32>,
    #[serde(default)]
    pub val_accuracy: Option<f32>,
}

impl RunCard {
    /// Unaugmented pipeline matching the one used at training time.
    pub fn eval_pipeline(&self) -> TransformPipeline {
        TransformPipelineBuilder::new()
            .resolution(self.resolution)
            .preprocess(self.preprocess)
            .seed(self.seed)
            .build()
    }

    pub fn save(&self, dir: &Path) -> InferenceResult<PathBuf> {
        let path = dir.join(RUN_CARD_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|source| InferenceError::RunCard {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| InferenceError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn load(dir: &Path) -> InferenceResult<Self> {
        let path = dir.join(RUN_CARD_FILE);
        let raw = fs::read_to_string(&path).map_err(|source| InferenceError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| InferenceError::RunCard { path, source })
    }
}

/// Write `model.bin` and `run_card.json` into `dir`; returns the record path.
pub fn save_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    card: &RunCard,
    dir: &Path,
) -> InferenceResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|source| InferenceError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let stem = dir.join(MODEL_RECORD);
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .save_file(stem.clone(), &recorder)
        .map_err(|e| InferenceError::Record {
            path: stem.clone(),
            msg: e.to_string(),
        })?;
    card.save(dir)?;
    Ok(stem.with_extension("bin"))
}

/// Load the record stored in checkpoint `dir` into a freshly built `model`.
pub fn load_record<B: Backend, M: Module<B>>(
    model: M,
    dir: &Path,
    device: &B::Device,
) -> InferenceResult<M> {
    let stem = dir.join(MODEL_RECORD);
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(stem.clone(), &recorder, device)
        .map_err(|e| InferenceError::Record {
            path: stem,
            msg: e.to_string(),
        })
}
