#![recursion_limit = "256"]

//! Prediction side of the triclass workspace: run a trained classifier over the
//! test manifest, decode the argmax through the [`ClassMap`], and write the
//! submission table. Also owns the checkpoint format (Burn record + run card)
//! shared with the `training` crate.

pub mod checkpoint;
pub mod cli;
pub mod predictor;
pub mod submission;

use burn_dataset::DatasetError;
use data_contracts::LabelError;
use models::SpecError;
use std::path::PathBuf;
use thiserror::Error;

pub use data_contracts::ClassMap;

/// Backend alias for inference (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type InferenceBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Label(#[from] LabelError),
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error("model emits {actual} classes but the class map has {expected}")]
    ClassCount { expected: usize, actual: usize },
    #[error("tensor readback failed: {0}")]
    Tensor(String),
    #[error("checkpoint record {path}: {msg}")]
    Record { path: PathBuf, msg: String },
    #[error("run card {path}: {source}")]
    RunCard {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type InferenceResult<T> = Result<T, InferenceError>;

pub use checkpoint::{load_record, save_checkpoint, Architecture, RunCard, RUN_CARD_FILE};
pub use cli::{run_predict, PredictArgs};
pub use predictor::{argmax, predict_batches, predict_test_set, Prediction};
pub use submission::{Submission, DEFAULT_SUBMISSION};

pub mod prelude {
    pub use crate::checkpoint::{Architecture, RunCard};
    pub use crate::predictor::{predict_test_set, Prediction};
    pub use crate::submission::Submission;
    pub use crate::{InferenceBackend, InferenceError, InferenceResult};
}
