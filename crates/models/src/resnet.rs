//! Bottleneck residual backbone.
//!
//! Layout follows the Keras ResNet-50: a 7x7/2 stem, a 3x3/2 max pool, then
//! four stages of bottleneck blocks where the first block of a stage carries
//! the stride on its leading 1x1 convolution. Batch norms always run on their
//! running statistics: the backbone is a frozen feature extractor.

use crate::spec::SpecError;
use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};
use std::path::Path;

const BN_EPSILON: f64 = 1.001e-5;
const EXPANSION: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResNetConfig {
    /// Bottleneck blocks per stage.
    pub blocks: [usize; 4],
    /// Inner width of the first stage; doubles at every later stage.
    pub base_width: usize,
}

impl ResNetConfig {
    pub fn resnet50() -> Self {
        Self {
            blocks: [3, 4, 6, 3],
            base_width: 64,
        }
    }

    /// One block per stage at 1/16 width. Same topology, cheap enough for tests.
    pub fn tiny() -> Self {
        Self {
            blocks: [1, 1, 1, 1],
            base_width: 4,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.base_width * 8 * EXPANSION
    }

    /// Feature map `[channels, h, w]` produced for a square `side` x `side` input.
    pub fn feature_shape(&self, side: usize) -> Result<[usize; 3], SpecError> {
        if self.base_width == 0 || self.blocks.contains(&0) {
            return Err(SpecError::InvalidLayer {
                index: 0,
                layer: "resnet".into(),
                msg: format!("degenerate config {self:?}"),
            });
        }
        // 7x7/2 stem with padding 3, then 3x3/2 pool with padding 1.
        let stem = (side + 6).checked_sub(7).map(|v| v / 2 + 1);
        let pooled = stem.and_then(|s| (s + 2).checked_sub(3)).map(|v| v / 2 + 1);
        let Some(mut h) = pooled.filter(|h| *h > 0) else {
            return Err(SpecError::EmptyInput([3, side, side]));
        };
        for _ in 1..4 {
            h = (h - 1) / 2 + 1;
        }
        Ok([self.out_channels(), h, h])
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let stem_conv = Conv2dConfig::new([3, self.base_width], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .init(device);
        let stem_norm = norm(self.base_width, device);
        let stem_pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut stages = Vec::with_capacity(4);
        let mut in_channels = self.base_width;
        for (index, &count) in self.blocks.iter().enumerate() {
            let width = self.base_width << index;
            let stride = if index == 0 { 1 } else { 2 };
            let mut blocks = Vec::with_capacity(count);
            for b in 0..count {
                let block_stride = if b == 0 { stride } else { 1 };
                blocks.push(Bottleneck::new(in_channels, width, block_stride, device));
                in_channels = width * EXPANSION;
            }
            stages.push(Stage { blocks });
        }

        ResNet {
            stem_conv,
            stem_norm,
            stem_pool,
            stages,
            config: Ignored(self.clone()),
        }
    }
}

fn norm<B: Backend>(channels: usize, device: &B::Device) -> BatchNorm<B, 2> {
    BatchNormConfig::new(channels)
        .with_epsilon(BN_EPSILON)
        .init(device)
}

/// Batch norm on running statistics regardless of backend mode.
fn frozen_norm<B: Backend>(bn: &BatchNorm<B, 2>, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let channels = bn.gamma.val().dims()[0];
    let shape = [1, channels, 1, 1];
    let mean = bn.running_mean.value().reshape(shape);
    let std = bn.running_var.value().add_scalar(bn.epsilon).sqrt().reshape(shape);
    let gamma = bn.gamma.val().reshape(shape);
    let beta = bn.beta.val().reshape(shape);
    x.sub(mean).div(std).mul(gamma).add(beta)
}

#[derive(Module, Debug)]
struct Projection<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

#[derive(Module, Debug)]
struct Bottleneck<B: Backend> {
    reduce: Conv2d<B>,
    reduce_norm: BatchNorm<B, 2>,
    conv: Conv2d<B>,
    conv_norm: BatchNorm<B, 2>,
    expand: Conv2d<B>,
    expand_norm: BatchNorm<B, 2>,
    shortcut: Option<Projection<B>>,
}

impl<B: Backend> Bottleneck<B> {
    fn new(in_channels: usize, width: usize, stride: usize, device: &B::Device) -> Self {
        let out_channels = width * EXPANSION;
        let shortcut = (stride != 1 || in_channels != out_channels).then(|| Projection {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .init(device),
            norm: norm(out_channels, device),
        });
        Self {
            reduce: Conv2dConfig::new([in_channels, width], [1, 1])
                .with_stride([stride, stride])
                .init(device),
            reduce_norm: norm(width, device),
            conv: Conv2dConfig::new([width, width], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            conv_norm: norm(width, device),
            expand: Conv2dConfig::new([width, out_channels], [1, 1]).init(device),
            expand_norm: norm(out_channels, device),
            shortcut,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(p) => frozen_norm(&p.norm, p.conv.forward(input.clone())),
            None => input.clone(),
        };
        let x = relu(frozen_norm(&self.reduce_norm, self.reduce.forward(input)));
        let x = relu(frozen_norm(&self.conv_norm, self.conv.forward(x)));
        let x = frozen_norm(&self.expand_norm, self.expand.forward(x));
        relu(x + identity)
    }
}

#[derive(Module, Debug)]
struct Stage<B: Backend> {
    blocks: Vec<Bottleneck<B>>,
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem_conv: Conv2d<B>,
    stem_norm: BatchNorm<B, 2>,
    stem_pool: MaxPool2d,
    stages: Vec<Stage<B>>,
    config: Ignored<ResNetConfig>,
}

impl<B: Backend> ResNet<B> {
    pub fn config(&self) -> &ResNetConfig {
        &self.config.0
    }

    /// Feature map `[N, out_channels, h, w]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(frozen_norm(&self.stem_norm, self.stem_conv.forward(images)));
        let mut x = self.stem_pool.forward(x);
        for stage in &self.stages {
            for block in &stage.blocks {
                x = block.forward(x);
            }
        }
        x
    }

    /// Replace every parameter with the values stored in a Burn binary record.
    pub fn load_weights(self, path: &Path, device: &B::Device) -> Result<Self, RecorderError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.load_file(path.to_path_buf(), &recorder, device)
    }

    pub fn save_weights(self, path: &Path) -> Result<(), RecorderError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.save_file(path.to_path_buf(), &recorder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn_ndarray::NdArray<f32>;

    #[test]
    fn resnet50_feature_shape_at_224() {
        let cfg = ResNetConfig::resnet50();
        assert_eq!(cfg.feature_shape(224).unwrap(), [2048, 7, 7]);
        assert_eq!(cfg.feature_shape(32).unwrap(), [2048, 1, 1]);
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert!(ResNetConfig::resnet50().feature_shape(0).is_err());
        let cfg = ResNetConfig {
            blocks: [1, 0, 1, 1],
            base_width: 4,
        };
        assert!(cfg.feature_shape(224).is_err());
    }

    #[test]
    fn tiny_forward_matches_declared_shape() {
        let device = Default::default();
        let cfg = ResNetConfig::tiny();
        let net = cfg.init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);
        let [c, h, w] = cfg.feature_shape(32).unwrap();
        assert_eq!(net.forward(input).dims(), [2, c, h, w]);
        assert_eq!(net.config(), &cfg);
    }

    #[test]
    fn weights_round_trip_through_a_record_file() {
        let device = Default::default();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("backbone");
        let cfg = ResNetConfig::tiny();
        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);

        let a = cfg.init::<TestBackend>(&device);
        let expected = a.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        a.save_weights(&path).unwrap();

        let b = cfg
            .init::<TestBackend>(&device)
            .load_weights(&path, &device)
            .unwrap();
        let actual = b.forward(input).into_data().to_vec::<f32>().unwrap();
        assert_eq!(expected, actual);
    }
}
