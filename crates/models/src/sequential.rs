use crate::spec::{Activation, LayerSpec, NetworkSpec, Shape, SpecError};
use crate::ImageClassifier;
use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};

/// Batch-norm settings matching the usual Keras defaults (momentum 0.99, eps 1e-3).
const BN_MOMENTUM: f64 = 0.01;
const BN_EPSILON: f64 = 1e-3;

/// Network built from a [`NetworkSpec`]. Parameterized layers live in per-kind
/// vectors and are consumed in spec order during `forward`.
#[derive(Module, Debug)]
pub struct SequentialNet<B: Backend> {
    convs: Vec<Conv2d<B>>,
    norms: Vec<BatchNorm<B, 2>>,
    pools: Vec<MaxPool2d>,
    gaps: Vec<AdaptiveAvgPool2d>,
    denses: Vec<Linear<B>>,
    dropouts: Vec<Dropout>,
    spec: Ignored<NetworkSpec>,
}

enum Activations<B: Backend> {
    Spatial(Tensor<B, 4>),
    Flat(Tensor<B, 2>),
}

fn activate<B: Backend, const D: usize>(x: Tensor<B, D>, activation: Activation) -> Tensor<B, D> {
    match activation {
        Activation::Linear => x,
        Activation::Relu => relu(x),
    }
}

impl<B: Backend> SequentialNet<B> {
    pub fn new(spec: NetworkSpec, device: &B::Device) -> Result<Self, SpecError> {
        let shapes = spec.infer_shapes()?;
        let mut convs = Vec::new();
        let mut norms = Vec::new();
        let mut pools = Vec::new();
        let mut gaps = Vec::new();
        let mut denses = Vec::new();
        let mut dropouts = Vec::new();

        let mut prev = Shape::Spatial(spec.input);
        for (layer, out) in spec.layers.iter().zip(&shapes) {
            match (layer, prev) {
                (LayerSpec::Conv2d { filters, kernel, .. }, Shape::Spatial([c, _, _])) => {
                    convs.push(Conv2dConfig::new([c, *filters], *kernel).init(device));
                }
                (LayerSpec::BatchNorm, Shape::Spatial([c, _, _])) => {
                    norms.push(
                        BatchNormConfig::new(c)
                            .with_momentum(BN_MOMENTUM)
                            .with_epsilon(BN_EPSILON)
                            .init(device),
                    );
                }
                (LayerSpec::MaxPool2d { pool }, _) => {
                    pools.push(MaxPool2dConfig::new(*pool).with_strides(*pool).init());
                }
                (LayerSpec::GlobalAvgPool, _) => {
                    gaps.push(AdaptiveAvgPool2dConfig::new([1, 1]).init());
                }
                (LayerSpec::Dense { units, .. }, Shape::Flat(n)) => {
                    denses.push(LinearConfig::new(n, *units).init(device));
                }
                (LayerSpec::Dropout { rate }, _) => {
                    dropouts.push(DropoutConfig::new(*rate).init());
                }
                _ => {}
            }
            prev = *out;
        }

        Ok(Self {
            convs,
            norms,
            pools,
            gaps,
            denses,
            dropouts,
            spec: Ignored(spec),
        })
    }

    pub fn spec(&self) -> &NetworkSpec {
        &self.spec.0
    }

    /// Logits `[N, units]` for input `[N, C, H, W]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let (mut conv, mut norm, mut pool, mut gap, mut dense, mut drop) = (0, 0, 0, 0, 0, 0);
        let mut x = Activations::Spatial(input);
        for layer in &self.spec.0.layers {
            x = match (layer, x) {
                (LayerSpec::Conv2d { activation, .. }, Activations::Spatial(t)) => {
                    let y = self.convs[conv].forward(t);
                    conv += 1;
                    Activations::Spatial(activate(y, *activation))
                }
                (LayerSpec::BatchNorm, Activations::Spatial(t)) => {
                    let y = self.norms[norm].forward(t);
                    norm += 1;
                    Activations::Spatial(y)
                }
                (LayerSpec::MaxPool2d { .. }, Activations::Spatial(t)) => {
                    let y = self.pools[pool].forward(t);
                    pool += 1;
                    Activations::Spatial(y)
                }
                (LayerSpec::Flatten, Activations::Spatial(t)) => {
                    Activations::Flat(t.flatten::<2>(1, 3))
                }
                (LayerSpec::GlobalAvgPool, Activations::Spatial(t)) => {
                    let y = self.gaps[gap].forward(t);
                    gap += 1;
                    Activations::Flat(y.flatten::<2>(1, 3))
                }
                (LayerSpec::Dense { activation, .. }, Activations::Flat(t)) => {
                    let y = self.denses[dense].forward(t);
                    dense += 1;
                    Activations::Flat(activate(y, *activation))
                }
                (LayerSpec::Dropout { .. }, Activations::Spatial(t)) => {
                    let y = self.dropouts[drop].forward(t);
                    drop += 1;
                    Activations::Spatial(y)
                }
                (LayerSpec::Dropout { .. }, Activations::Flat(t)) => {
                    let y = self.dropouts[drop].forward(t);
                    drop += 1;
                    Activations::Flat(y)
                }
                // Unreachable for specs that passed shape inference in `new`.
                (_, other) => other,
            };
        }
        match x {
            Activations::Flat(t) => t,
            Activations::Spatial(t) => t.flatten::<2>(1, 3),
        }
    }
}

impl<B: Backend> ImageClassifier<B> for SequentialNet<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}
