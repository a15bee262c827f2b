//! Burn networks for three-class image classification.
//!
//! - [`SequentialNet`]: a network built from a declarative [`NetworkSpec`]
//!   (the shallow CNN, and the head of the transfer model).
//! - [`ResNet`]: bottleneck residual backbone (ResNet-50 layout by default).
//! - [`TransferNet`]: frozen backbone followed by a trainable head.
//!
//! All of them produce raw logits; softmax is applied by the loss and by the
//! predictor. The `inference` and `training` crates only talk to them through
//! [`ImageClassifier`].

use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};

pub mod resnet;
pub mod sequential;
pub mod spec;
pub mod transfer;

pub use resnet::{ResNet, ResNetConfig};
pub use sequential::SequentialNet;
pub use spec::{Activation, LayerSpec, NetworkSpec, Shape, SpecError};
pub use transfer::{TransferNet, TransferNetConfig};

/// Image batch `[N, 3, H, W]` in, class logits `[N, num_classes]` out.
pub trait ImageClassifier<B: Backend>: Module<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

pub mod prelude {
    pub use super::{
        ImageClassifier, NetworkSpec, ResNet, ResNetConfig, SequentialNet, TransferNet,
        TransferNetConfig,
    };
}
