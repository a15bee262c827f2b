//! Argument groups and small helpers shared by the `train` and `predict` binaries.

use burn_dataset::manifest::{DEFAULT_TEST_MANIFEST, DEFAULT_TRAIN_MANIFEST};
use burn_dataset::DatasetLayout;
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Model family; selects resolution, preprocessing and training preset.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Small CNN trained from scratch at 32x32.
    Shallow,
    /// Frozen ResNet-50 backbone with a dense head at 224x224.
    Transfer,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Shallow => "shallow",
            Variant::Transfer => "transfer",
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

/// Fail early when the requested backend was not compiled in.
pub fn validate_backend_choice(kind: BackendKind, built_wgpu: bool) -> anyhow::Result<()> {
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            println!("note: built with backend-wgpu; the WGPU backend is used despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

/// Dataset root and the names of the manifests and image folders under it.
#[derive(Debug, Clone, Args)]
pub struct DatasetArgs {
    /// Directory holding the manifests and the image folders.
    #[arg(long, default_value = ".")]
    pub data_root: PathBuf,
    #[arg(long, default_value = DEFAULT_TRAIN_MANIFEST)]
    pub train_manifest: String,
    #[arg(long, default_value = DEFAULT_TEST_MANIFEST)]
    pub test_manifest: String,
    /// Training image folder, relative to the data root.
    #[arg(long, default_value = "train")]
    pub train_dir: String,
    /// Test image folder, relative to the data root.
    #[arg(long, default_value = "test")]
    pub test_dir: String,
}

impl DatasetArgs {
    pub fn layout(&self) -> DatasetLayout {
        DatasetLayout {
            root: self.data_root.clone(),
            train_manifest: self.train_manifest.clone(),
            test_manifest: self.test_manifest.clone(),
            train_dir: self.train_dir.clone(),
            test_dir: self.test_dir.clone(),
        }
    }
}
