//! Run configuration: a per-variant preset, optionally overlaid by a TOML file,
//! then by command-line flags.
//!
//! ```toml
//! [train]
//! epochs = 40
//! batch_size = 16
//! patience = 5        # 0 disables early stopping
//!
//! [augment]
//! rotation_deg = 10.0
//! enabled = true
//!
//! [backbone]
//! blocks = [3, 4, 6, 3]
//! base_width = 64
//! ```

use anyhow::Context;
use burn_dataset::{AugmentConfig, Preprocess, Resolution};
use cli_support::Variant;
use models::ResNetConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_VAL_RATIO: f64 = 0.1;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_LEARNING_RATE: f64 = 1e-3;
pub const ADAM_EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainConfig {
    pub variant: Variant,
    pub resolution: Resolution,
    pub preprocess: Preprocess,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Epochs without validation-loss improvement before stopping; `None` trains the full budget.
    pub patience: Option<usize>,
    pub val_ratio: f64,
    pub seed: u64,
    pub augment: AugmentConfig,
    /// Backbone layout (transfer variant only).
    pub backbone: ResNetConfig,
    /// Hidden dense width of the transfer head.
    pub head_units: usize,
}

impl TrainConfig {
    pub fn preset(variant: Variant) -> Self {
        match variant {
            Variant::Shallow => Self {
                variant,
                resolution: Resolution::SHALLOW,
                preprocess: Preprocess::Raw,
                epochs: 150,
                batch_size: DEFAULT_BATCH_SIZE,
                learning_rate: DEFAULT_LEARNING_RATE,
                patience: None,
                val_ratio: DEFAULT_VAL_RATIO,
                seed: DEFAULT_SEED,
                augment: AugmentConfig::default(),
                backbone: ResNetConfig::resnet50(),
                head_units: 1024,
            },
            Variant::Transfer => Self {
                variant,
                resolution: Resolution::TRANSFER,
                preprocess: Preprocess::Caffe,
                epochs: 60,
                patience: Some(7),
                ..Self::preset(Variant::Shallow)
            },
        }
    }

    /// Overlay every key present in `file`.
    pub fn apply_file(&mut self, file: TrainConfigFile) {
        if let Some(train) = file.train {
            if let Some(v) = train.epochs {
                self.epochs = v;
            }
            if let Some(v) = train.batch_size {
                self.batch_size = v;
            }
            if let Some(v) = train.learning_rate {
                self.learning_rate = v;
            }
            if let Some(v) = train.patience {
                self.patience = (v > 0).then_some(v);
            }
            if let Some(v) = train.val_ratio {
                self.val_ratio = v;
            }
            if let Some(v) = train.seed {
                self.seed = v;
            }
            if let Some(side) = train.resolution {
                self.resolution = Resolution::square(side);
            }
            if let Some(v) = train.head_units {
                self.head_units = v;
            }
        }
        if let Some(aug) = file.augment {
            if let Some(v) = aug.rotation_deg {
                self.augment.rotation_deg = v;
            }
            if let Some(v) = aug.width_shift {
                self.augment.width_shift = v;
            }
            if let Some(v) = aug.height_shift {
                self.augment.height_shift = v;
            }
            if let Some(v) = aug.zoom {
                self.augment.zoom = v;
            }
            if aug.enabled == Some(false) {
                self.augment = AugmentConfig::none();
            }
        }
        if let Some(backbone) = file.backbone {
            if let Some(v) = backbone.blocks {
                self.backbone.blocks = v;
            }
            if let Some(v) = backbone.base_width {
                self.backbone.base_width = v;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.epochs == 0 {
            anyhow::bail!("epochs must be at least 1");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch size must be at least 1");
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            anyhow::bail!("learning rate must be positive, got {}", self.learning_rate);
        }
        if !(self.val_ratio > 0.0 && self.val_ratio < 1.0) {
            anyhow::bail!("validation ratio must be in (0, 1), got {}", self.val_ratio);
        }
        if self.head_units == 0 {
            anyhow::bail!("head_units must be at least 1");
        }
        self.resolution
            .validate()
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        self.augment
            .validate()
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!(
            "variant={} resolution={} preprocess={} epochs={} batch_size={} lr={} patience={} val_ratio={} seed={}",
            self.variant.as_str(),
            self.resolution,
            self.preprocess.as_str(),
            self.epochs,
            self.batch_size,
            self.learning_rate,
            self.patience
                .map(|p| p.to_string())
                .unwrap_or_else(|| "off".to_string()),
            self.val_ratio,
            self.seed
        )
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TrainConfigFile {
    pub train: Option<TrainSection>,
    pub augment: Option<AugmentSection>,
    pub backbone: Option<BackboneSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TrainSection {
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f64>,
    pub patience: Option<usize>,
    pub val_ratio: Option<f64>,
    pub seed: Option<u64>,
    /// Square side in pixels.
    pub resolution: Option<u32>,
    pub head_units: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AugmentSection {
    pub enabled: Option<bool>,
    pub rotation_deg: Option<f32>,
    pub width_shift: Option<f32>,
    pub height_shift: Option<f32>,
    pub zoom: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BackboneSection {
    pub blocks: Option<[usize; 4]>,
    pub base_width: Option<usize>,
}

impl TrainConfigFile {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_the_two_variants() {
        let shallow = TrainConfig::preset(Variant::Shallow);
        assert_eq!(shallow.resolution, Resolution::square(32));
        assert_eq!(shallow.epochs, 150);
        assert_eq!(shallow.patience, None);
        assert_eq!(shallow.preprocess, Preprocess::Raw);

        let transfer = TrainConfig::preset(Variant::Transfer);
        assert_eq!(transfer.resolution, Resolution::square(224));
        assert_eq!(transfer.epochs, 60);
        assert_eq!(transfer.patience, Some(7));
        assert_eq!(transfer.preprocess, Preprocess::Caffe);
        assert_eq!(transfer.batch_size, 32);
        assert_eq!(transfer.learning_rate, 1e-3);
        assert_eq!(transfer.backbone, ResNetConfig::resnet50());
    }

    #[test]
    fn file_overrides_only_present_keys() {
        let file = TrainConfigFile::parse(
            r#"
            [train]
            epochs = 3
            patience = 0

            [augment]
            rotation_deg = 5.0

            [backbone]
            blocks = [1, 1, 1, 1]
            "#,
        )
        .unwrap();
        let mut cfg = TrainConfig::preset(Variant::Transfer);
        cfg.apply_file(file);
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.patience, None);
        assert_eq!(cfg.batch_size, 32);
        assert_eq!(cfg.augment.rotation_deg, 5.0);
        assert_eq!(cfg.augment.zoom, 0.2);
        assert_eq!(cfg.backbone.blocks, [1, 1, 1, 1]);
        assert_eq!(cfg.backbone.base_width, 64);
    }

    #[test]
    fn disabled_augmentation_and_unknown_keys() {
        let mut cfg = TrainConfig::preset(Variant::Shallow);
        cfg.apply_file(TrainConfigFile::parse("[augment]\nenabled = false\n").unwrap());
        assert!(cfg.augment.is_disabled());
        assert!(TrainConfigFile::parse("[train]\nepocs = 3\n").is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = TrainConfig::preset(Variant::Shallow);
        assert!(cfg.validate().is_ok());
        cfg.val_ratio = 1.0;
        assert!(cfg.validate().is_err());
        cfg.val_ratio = 0.1;
        cfg.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn augment_bounds_from_file_are_validated() {
        for body in [
            "[augment]\nrotation_deg = inf\n",
            "[augment]\nzoom = 5.0\n",
            "[augment]\nzoom = 1.0\n",
            "[augment]\nwidth_shift = -0.2\n",
            "[augment]\nheight_shift = nan\n",
        ] {
            let mut cfg = TrainConfig::preset(Variant::Shallow);
            cfg.apply_file(TrainConfigFile::parse(body).unwrap());
            assert!(cfg.validate().is_err(), "accepted {body:?}");
        }
        let mut cfg = TrainConfig::preset(Variant::Shallow);
        cfg.apply_file(TrainConfigFile::parse("[augment]\nzoom = 0.5\n").unwrap());
        assert!(cfg.validate().is_ok());
    }
}
