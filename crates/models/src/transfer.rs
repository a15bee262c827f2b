use crate::resnet::{ResNet, ResNetConfig};
use crate::sequential::SequentialNet;
use crate::spec::{NetworkSpec, SpecError};
use crate::ImageClassifier;
use burn::module::{Ignored, Module};
use burn::record::RecorderError;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferNetConfig {
    pub backbone: ResNetConfig,
    /// Square input side in pixels.
    pub input_side: usize,
    pub hidden: usize,
    pub num_classes: usize,
}

impl TransferNetConfig {
    pub fn resnet50(num_classes: usize) -> Self {
        Self {
            backbone: ResNetConfig::resnet50(),
            input_side: 224,
            hidden: 1024,
            num_classes,
        }
    }

    pub fn head_spec(&self) -> Result<NetworkSpec, SpecError> {
        let features = self.backbone.feature_shape(self.input_side)?;
        let spec = NetworkSpec::transfer_head(features, self.hidden, self.num_classes);
        spec.output_units()?;
        Ok(spec)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<TransferNet<B>, SpecError> {
        let head = SequentialNet::new(self.head_spec()?, device)?;
        Ok(TransferNet {
            backbone: self.backbone.init(device).no_grad(),
            head,
            config: Ignored(self.clone()),
        })
    }
}

/// Frozen residual backbone, global average pooling, then a trainable dense head.
#[derive(Module, Debug)]
pub struct TransferNet<B: Backend> {
    backbone: ResNet<B>,
    head: SequentialNet<B>,
    config: Ignored<TransferNetConfig>,
}

impl<B: Backend> TransferNet<B> {
    pub fn config(&self) -> &TransferNetConfig {
        &self.config.0
    }

    pub fn head(&self) -> &SequentialNet<B> {
        &self.head
    }

    pub fn backbone(&self) -> &ResNet<B> {
        &self.backbone
    }

    /// Load pretrained backbone parameters; the head is left untouched.
    pub fn with_backbone_weights(
        self,
        path: &Path,
        device: &B::Device,
    ) -> Result<Self, RecorderError> {
        let backbone = self.backbone.load_weights(path, device)?.no_grad();
        Ok(Self { backbone, ..self })
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        // No gradient flows into the backbone.
        let features = self.backbone.forward(images).detach();
        self.head.forward(features)
    }
}

impl<B: Backend> ImageClassifier<B> for TransferNet<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}
