//! Declarative layer stacks.
//!
//! A [`NetworkSpec`] is an immutable, ordered list of typed layer records. It is
//! validated by shape inference before any parameter is allocated, and is what
//! gets written to a run card so a checkpoint can be rebuilt later.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpecError {
    #[error("layer {index} ({layer}): {msg}")]
    InvalidLayer {
        index: usize,
        layer: String,
        msg: String,
    },
    #[error("input shape {0:?} has a zero dimension")]
    EmptyInput([usize; 3]),
    #[error("network must end in a flat output, got spatial {0:?}")]
    SpatialOutput([usize; 3]),
    #[error("network has no layers")]
    NoLayers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSpec {
    /// Valid-padded, stride 1 convolution.
    Conv2d {
        filters: usize,
        kernel: [usize; 2],
        activation: Activation,
    },
    BatchNorm,
    /// Non-overlapping max pooling (stride = pool size).
    MaxPool2d { pool: [usize; 2] },
    Flatten,
    GlobalAvgPool,
    Dense { units: usize, activation: Activation },
    Dropout { rate: f64 },
}

impl LayerSpec {
    pub fn name(&self) -> &'static str {
        match self {
            LayerSpec::Conv2d { .. } => "conv2d",
            LayerSpec::BatchNorm => "batch_norm",
            LayerSpec::MaxPool2d { .. } => "max_pool2d",
            LayerSpec::Flatten => "flatten",
            LayerSpec::GlobalAvgPool => "global_avg_pool",
            LayerSpec::Dense { .. } => "dense",
            LayerSpec::Dropout { .. } => "dropout",
        }
    }
}

/// Activation shape between layers (batch dimension omitted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    /// `[channels, height, width]`
    Spatial([usize; 3]),
    Flat(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// `[channels, height, width]`
    pub input: [usize; 3],
    pub layers: Vec<LayerSpec>,
}

impl NetworkSpec {
    pub fn new(input: [usize; 3], layers: Vec<LayerSpec>) -> Self {
        Self { input, layers }
    }

    /// Three conv/batch-norm/pool blocks (32, 64, 128 filters), a 512-unit dense
    /// layer with 0.5 dropout, and a linear head over `num_classes`.
    pub fn shallow_cnn(side: usize, num_classes: usize) -> Self {
        let mut layers = Vec::new();
        for filters in [32, 64, 128] {
            layers.push(LayerSpec::Conv2d {
                filters,
                kernel: [3, 3],
                activation: Activation::Relu,
            });
            layers.push(LayerSpec::BatchNorm);
            layers.push(LayerSpec::MaxPool2d { pool: [2, 2] });
        }
        layers.extend([
            LayerSpec::Flatten,
            LayerSpec::Dense {
                units: 512,
                activation: Activation::Relu,
            },
            LayerSpec::Dropout { rate: 0.5 },
            LayerSpec::Dense {
                units: num_classes,
                activation: Activation::Linear,
            },
        ]);
        Self::new([3, side, side], layers)
    }

    /// Head placed on top of a backbone feature map of shape `features`.
    pub fn transfer_head(features: [usize; 3], hidden: usize, num_classes: usize) -> Self {
        Self::new(
            features,
            vec![
                LayerSpec::GlobalAvgPool,
                LayerSpec::Dense {
                    units: hidden,
                    activation: Activation::Relu,
                },
                LayerSpec::Dense {
                    units: num_classes,
                    activation: Activation::Linear,
                },
            ],
        )
    }

    /// Shape after each layer, in order.
    pub fn infer_shapes(&self) -> Result<Vec<Shape>, SpecError> {
        if self.layers.is_empty() {
            return Err(SpecError::NoLayers);
        }
        if self.input.contains(&0) {
            return Err(SpecError::EmptyInput(self.input));
        }
        let mut shape = Shape::Spatial(self.input);
        let mut shapes = Vec::with_capacity(self.layers.len());
        for (index, layer) in self.layers.iter().enumerate() {
            let bad = |msg: String| SpecError::InvalidLayer {
                index,
                layer: layer.name().to_string(),
                msg,
            };
            shape = match (layer, shape) {
                (
                    LayerSpec::Conv2d {
                        filters, kernel, ..
                    },
                    Shape::Spatial([_, h, w]),
                ) => {
                    if *filters == 0 || kernel.contains(&0) {
                        return Err(bad("filters and kernel must be non-zero".into()));
                    }
                    if kernel[0] > h || kernel[1] > w {
                        return Err(bad(format!("kernel {kernel:?} larger than input {h}x{w}")));
                    }
                    Shape::Spatial([*filters, h - kernel[0] + 1, w - kernel[1] + 1])
                }
                (LayerSpec::BatchNorm, s @ Shape::Spatial(_)) => s,
                (LayerSpec::MaxPool2d { pool }, Shape::Spatial([c, h, w])) => {
                    if pool.contains(&0) {
                        return Err(bad("pool size must be non-zero".into()));
                    }
                    let (oh, ow) = (h / pool[0], w / pool[1]);
                    if oh == 0 || ow == 0 {
                        return Err(bad(format!("pool {pool:?} collapses {h}x{w}")));
                    }
                    Shape::Spatial([c, oh, ow])
                }
                (LayerSpec::Flatten, Shape::Spatial([c, h, w])) => Shape::Flat(c * h * w),
                (LayerSpec::GlobalAvgPool, Shape::Spatial([c, _, _])) => Shape::Flat(c),
                (LayerSpec::Dense { units, .. }, Shape::Flat(_)) => {
                    if *units == 0 {
                        return Err(bad("units must be non-zero".into()));
                    }
                    Shape::Flat(*units)
                }
                (LayerSpec::Dropout { rate }, s) => {
                    if !(0.0..1.0).contains(rate) {
                        return Err(bad(format!("rate {rate} outside [0, 1)")));
                    }
                    s
                }
                (_, Shape::Flat(n)) => {
                    return Err(bad(format!("needs a spatial input, got flat {n}")));
                }
                (_, Shape::Spatial(s)) => {
                    return Err(bad(format!("needs a flat input, got spatial {s:?}")));
                }
            };
            shapes.push(shape);
        }
        Ok(shapes)
    }

    /// Validate and return the width of the final flat output.
    pub fn output_units(&self) -> Result<usize, SpecError> {
        match self.infer_shapes()?.last() {
            Some(Shape::Flat(n)) => Ok(*n),
            Some(Shape::Spatial(s)) => Err(SpecError::SpatialOutput(*s)),
            None => Err(SpecError::NoLayers),
        }
    }

    pub fn describe(&self) -> String {
        let layers: Vec<String> = self
            .layers
            .iter()
            .map(|l| match l {
                LayerSpec::Conv2d {
                    filters, kernel, ..
                } => format!("conv{}x{}({filters})", kernel[0], kernel[1]),
                LayerSpec::MaxPool2d { pool } => format!("pool{}x{}", pool[0], pool[1]),
                LayerSpec::Dense { units, .. } => format!("dense({units})"),
                LayerSpec::Dropout { rate } => format!("dropout({rate})"),
                other => other.name().to_string(),
            })
            .collect();
        format!("input={:?} {}", self.input, layers.join(" > "))
    }
}
