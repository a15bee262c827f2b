#![recursion_limit = "256"]

pub mod config;
pub mod trainer;
pub mod util;

pub use config::{TrainConfig, TrainConfigFile};
pub use trainer::{cross_entropy, evaluate, fit, EarlyStopping, EpochMetrics, MetricsSink, TrainOutcome};
pub use util::{resolve_config, run_train, TrainArgs, TrainReport};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
