//! Dataset loading, splitting, and Burn-compatible batching for the triclass workspace.
//!
//! This crate provides utilities for:
//! - Reading train/test manifests
//! - Decoding and resizing images into fixed-shape tensors
//! - Seeded train/val splitting
//! - Affine augmentation and named preprocessing
//! - Burn-compatible batch iteration

pub mod aug;
pub mod manifest;
pub mod materialize;
pub mod splits;
pub mod types;
pub mod validation;

#[cfg(feature = "burn-runtime")]
pub mod batch;

pub use aug::{AffineParams, AugmentConfig, TransformPipeline, TransformPipelineBuilder};
pub use manifest::{load_manifest, DatasetLayout, Manifest};
pub use materialize::{materialize, materialize_file};
pub use splits::{split_indices, split_parallel, validation_count, Split, MIN_SPLIT_SAMPLES};
pub use types::*;
pub use validation::{preflight, summarize, DatasetSummary};

#[cfg(feature = "burn-runtime")]
pub use batch::{BatchConfig, BatchIter, ImageBatch};
