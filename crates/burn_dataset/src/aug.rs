//! Image augmentation and transformation pipeline.

use crate::types::{DatasetError, DatasetResult, ImageTensor, Preprocess, Resolution};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Bounds for random affine augmentation. All zero disables augmentation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AugmentConfig {
    /// Max rotation in degrees, sampled from `[-rotation_deg, rotation_deg]`.
    pub rotation_deg: f32,
    /// Max horizontal shift as a fraction of the width.
    pub width_shift: f32,
    /// Max vertical shift as a fraction of the height.
    pub height_shift: f32,
    /// Zoom factors are sampled per axis from `[1 - zoom, 1 + zoom]`.
    pub zoom: f32,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            rotation_deg: 20.0,
            width_shift: 0.2,
            height_shift: 0.2,
            zoom: 0.2,
        }
    }
}

impl AugmentConfig {
    pub fn none() -> Self {
        Self {
            rotation_deg: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            zoom: 0.0,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.rotation_deg <= 0.0
            && self.width_shift <= 0.0
            && self.height_shift <= 0.0
            && self.zoom <= 0.0
    }

    /// Bounds must be finite and non-negative; zoom must stay below 1 so every
    /// sampled factor is positive.
    pub fn validate(&self) -> DatasetResult<()> {
        let bounds = [
            ("rotation_deg", self.rotation_deg),
            ("width_shift", self.width_shift),
            ("height_shift", self.height_shift),
            ("zoom", self.zoom),
        ];
        for (name, value) in bounds {
            if !value.is_finite() || value < 0.0 {
                return Err(DatasetError::InvalidConfig(format!(
                    "augment {name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.zoom >= 1.0 {
            return Err(DatasetError::InvalidConfig(format!(
                "augment zoom must be below 1, got {}",
                self.zoom
            )));
        }
        Ok(())
    }

    /// Draw one set of transform parameters for an image of `width` x `height`.
    pub fn sample(&self, width: u32, height: u32, rng: &mut dyn rand::RngCore) -> AffineParams {
        fn symmetric(rng: &mut dyn rand::RngCore, bound: f32) -> f32 {
            if bound > 0.0 {
                rng.random_range(-bound..bound)
            } else {
                0.0
            }
        }
        let theta_deg = symmetric(rng, self.rotation_deg);
        let shift_rows = symmetric(rng, self.height_shift) * height as f32;
        let shift_cols = symmetric(rng, self.width_shift) * width as f32;
        let (zoom_rows, zoom_cols) = if self.zoom > 0.0 {
            (
                rng.random_range((1.0 - self.zoom)..(1.0 + self.zoom)),
                rng.random_range((1.0 - self.zoom)..(1.0 + self.zoom)),
            )
        } else {
            (1.0, 1.0)
        };
        AffineParams {
            theta_deg,
            shift_rows,
            shift_cols,
            zoom_rows,
            zoom_cols,
        }
    }
}

/// One concrete affine transform, expressed as the map from output pixel to
/// input pixel about the image centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    pub theta_deg: f32,
    pub shift_rows: f32,
    pub shift_cols: f32,
    pub zoom_rows: f32,
    pub zoom_cols: f32,
}

impl AffineParams {
    pub fn identity() -> Self {
        Self {
            theta_deg: 0.0,
            shift_rows: 0.0,
            shift_cols: 0.0,
            zoom_rows: 1.0,
            zoom_cols: 1.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Rotation · shift · zoom, as a 2x3 matrix acting on (row, col, 1).
    fn matrix(&self) -> [[f32; 3]; 2] {
        let t = self.theta_deg.to_radians();
        let (s, c) = t.sin_cos();
        [
            [
                c * self.zoom_rows,
                -s * self.zoom_cols,
                c * self.shift_rows - s * self.shift_cols,
            ],
            [
                s * self.zoom_rows,
                c * self.zoom_cols,
                s * self.shift_rows + c * self.shift_cols,
            ],
        ]
    }

    /// Resample `img` with bilinear interpolation. Source coordinates outside the
    /// image are clamped to the nearest edge pixel.
    pub fn warp(&self, img: &ImageTensor) -> ImageTensor {
        if self.is_identity() {
            return img.clone();
        }
        let h = img.height as usize;
        let w = img.width as usize;
        let m = self.matrix();
        let (or, oc) = ((h as f32 - 1.0) * 0.5, (w as f32 - 1.0) * 0.5);
        let max_r = (h - 1) as f32;
        let max_c = (w - 1) as f32;
        let mut data = vec![0u8; img.data.len()];

        for r in 0..h {
            for col in 0..w {
                let dr = r as f32 - or;
                let dc = col as f32 - oc;
                let sr = (m[0][0] * dr + m[0][1] * dc + m[0][2] + or).clamp(0.0, max_r);
                let sc = (m[1][0] * dr + m[1][1] * dc + m[1][2] + oc).clamp(0.0, max_c);

                let r0 = sr.floor() as usize;
                let c0 = sc.floor() as usize;
                let r1 = (r0 + 1).min(h - 1);
                let c1 = (c0 + 1).min(w - 1);
                let fr = sr - r0 as f32;
                let fc = sc - c0 as f32;

                let p00 = img.pixel(r0, c0);
                let p01 = img.pixel(r0, c1);
                let p10 = img.pixel(r1, c0);
                let p11 = img.pixel(r1, c1);
                let base = (r * w + col) * ImageTensor::CHANNELS;
                for ch in 0..ImageTensor::CHANNELS {
                    let top = p00[ch] as f32 * (1.0 - fc) + p01[ch] as f32 * fc;
                    let bottom = p10[ch] as f32 * (1.0 - fc) + p11[ch] as f32 * fc;
                    let v = top * (1.0 - fr) + bottom * fr;
                    data[base + ch] = v.round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        ImageTensor {
            width: img.width,
            height: img.height,
            data,
        }
    }
}

/// Per-sample seed mixing so augmentation does not depend on thread scheduling.
pub fn sample_seed(seed: u64, epoch: usize, position: usize) -> u64 {
    seed ^ ((epoch as u64) << 32) ^ position as u64
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    pub resolution: Resolution,
    pub augment: Option<AugmentConfig>,
    pub preprocess: Preprocess,
    pub seed: u64,
}

impl TransformPipeline {
    pub fn describe(&self) -> String {
        let aug = match &self.augment {
            Some(a) if !a.is_disabled() => format!(
                "rotation={:.1}deg shift=[{:.2}w,{:.2}h] zoom={:.2}",
                a.rotation_deg, a.width_shift, a.height_shift, a.zoom
            ),
            _ => "none".to_string(),
        };
        format!(
            "resolution={} preprocess={} augment={} seed={}",
            self.resolution,
            self.preprocess.as_str(),
            aug,
            self.seed
        )
    }

    pub fn augments(&self) -> bool {
        self.augment.is_some_and(|a| !a.is_disabled())
    }

    /// Augment (if enabled) and append the preprocessed CHW floats to `out`.
    pub fn apply(&self, tensor: &ImageTensor, epoch: usize, position: usize, out: &mut Vec<f32>) {
        match self.augment {
            Some(aug) if !aug.is_disabled() => {
                let mut rng =
                    rand::rngs::StdRng::seed_from_u64(sample_seed(self.seed, epoch, position));
                let params = aug.sample(tensor.width, tensor.height, &mut rng);
                let warped = params.warp(tensor);
                self.preprocess.extend_chw(&warped, out);
            }
            _ => self.preprocess.extend_chw(tensor, out),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    inner: TransformPipeline,
}

impl Default for TransformPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self {
            inner: TransformPipeline {
                resolution: Resolution::SHALLOW,
                augment: None,
                preprocess: Preprocess::Raw,
                seed: 42,
            },
        }
    }
    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.inner.resolution = resolution;
        self
    }
    pub fn augment(mut self, augment: Option<AugmentConfig>) -> Self {
        self.inner.augment = augment;
        self
    }
    pub fn preprocess(mut self, preprocess: Preprocess) -> Self {
        self.inner.preprocess = preprocess;
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.inner.seed = seed;
        self
    }
    pub fn build(self) -> TransformPipeline {
        self.inner
    }
}

#[cfg(test)]
mod aug_tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> ImageTensor {
        let mut data = Vec::new();
        for r in 0..h {
            for c in 0..w {
                data.extend_from_slice(&[(r * 10 + c) as u8, (c * 20) as u8, 255]);
            }
        }
        ImageTensor {
            width: w,
            height: h,
            data,
        }
    }

    #[test]
    fn identity_leaves_pixels_untouched() {
        let img = gradient(5, 4);
        assert_eq!(AffineParams::identity().warp(&img), img);
        let none = AugmentConfig::none();
        assert!(none.is_disabled());
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        assert!(none.sample(5, 4, &mut rng).is_identity());
    }

    #[test]
    fn half_turn_mirrors_both_axes() {
        let img = gradient(3, 3);
        let params = AffineParams {
            theta_deg: 180.0,
            ..AffineParams::identity()
        };
        let out = params.warp(&img);
        assert_eq!(out.pixel(0, 0), img.pixel(2, 2));
        assert_eq!(out.pixel(2, 0), img.pixel(0, 2));
        assert_eq!(out.pixel(1, 1), img.pixel(1, 1));
    }

    #[test]
    fn shift_fills_with_nearest_edge() {
        let img = gradient(3, 2);
        let params = AffineParams {
            shift_cols: 1.0,
            ..AffineParams::identity()
        };
        let out = params.warp(&img);
        for r in 0..2 {
            assert_eq!(out.pixel(r, 0), img.pixel(r, 1));
            assert_eq!(out.pixel(r, 1), img.pixel(r, 2));
            // Past the right edge: replicate last column.
            assert_eq!(out.pixel(r, 2), img.pixel(r, 2));
        }
    }

    #[test]
    fn sampled_params_stay_in_bounds() {
        let cfg = AugmentConfig::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let p = cfg.sample(32, 32, &mut rng);
            assert!(p.theta_deg.abs() <= 20.0);
            assert!(p.shift_rows.abs() <= 0.2 * 32.0);
            assert!(p.shift_cols.abs() <= 0.2 * 32.0);
            assert!((0.8..=1.2).contains(&p.zoom_rows));
            assert!((0.8..=1.2).contains(&p.zoom_cols));
        }
    }

    #[test]
    fn validate_rejects_unusable_bounds() {
        assert!(AugmentConfig::default().validate().is_ok());
        assert!(AugmentConfig::none().validate().is_ok());
        let bad = [
            AugmentConfig {
                rotation_deg: f32::INFINITY,
                ..AugmentConfig::default()
            },
            AugmentConfig {
                width_shift: f32::NAN,
                ..AugmentConfig::default()
            },
            AugmentConfig {
                height_shift: -0.1,
                ..AugmentConfig::default()
            },
            AugmentConfig {
                zoom: 1.0,
                ..AugmentConfig::default()
            },
            AugmentConfig {
                zoom: 5.0,
                ..AugmentConfig::default()
            },
        ];
        for cfg in bad {
            assert!(
                matches!(cfg.validate(), Err(DatasetError::InvalidConfig(_))),
                "{cfg:?}"
            );
        }
    }

    #[test]
    fn pipeline_is_reproducible_per_position() {
        let img = gradient(8, 8);
        let pipeline = TransformPipelineBuilder::new()
            .resolution(Resolution::square(8))
            .augment(Some(AugmentConfig::default()))
            .seed(42)
            .build();
        let run = |epoch, pos| {
            let mut out = Vec::new();
            pipeline.apply(&img, epoch, pos, &mut out);
            out
        };
        assert_eq!(run(0, 3), run(0, 3));
        assert_eq!(run(0, 3).len(), 8 * 8 * 3);
        assert_ne!(sample_seed(42, 0, 3), sample_seed(42, 1, 3));
    }
}
