//! Core types, error definitions, and data structures for burn_dataset.

use data_contracts::LabelError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("manifest not found: {path}")]
    MissingFile { path: PathBuf },
    #[error("malformed manifest {path}: {msg}")]
    MalformedManifest { path: PathBuf, msg: String },
    #[error("image decode error at {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("unsupported image format at {path}: {msg}")]
    UnsupportedFormat { path: PathBuf, msg: String },
    #[error("label for {file}: {source}")]
    Label {
        file: String,
        #[source]
        source: LabelError,
    },
    #[error("{missing} of {total} images missing (first: {first})")]
    MissingImages {
        missing: usize,
        total: usize,
        first: String,
    },
    #[error("insufficient data: {available} samples, need at least {required}")]
    InsufficientData { available: usize, required: usize },
    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: String,
        actual: String,
    },
    #[error("invalid dataset config: {0}")]
    InvalidConfig(String),
}

/// Square (or rectangular) target size every image is resized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Input size of the shallow network.
    pub const SHALLOW: Resolution = Resolution::square(32);
    /// Input size of the residual backbone.
    pub const TRANSFER: Resolution = Resolution::square(224);

    pub const fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn validate(&self) -> DatasetResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(DatasetError::InvalidConfig(format!(
                "resolution must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Decoded, resized image: raw 0-255 bytes in HWC order, always 3 channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTensor {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ImageTensor {
    pub const CHANNELS: usize = 3;

    pub fn from_rgb(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }

    /// `[height, width, channels]`.
    pub fn shape(&self) -> [usize; 3] {
        [self.height as usize, self.width as usize, Self::CHANNELS]
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    pub fn pixel(&self, row: usize, col: usize) -> [u8; 3] {
        let base = (row * self.width as usize + col) * Self::CHANNELS;
        [self.data[base], self.data[base + 1], self.data[base + 2]]
    }
}

/// Named preprocessing applied when image bytes become model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocess {
    /// Bytes cast to f32, range 0-255, RGB.
    Raw,
    /// BGR channel order with the ImageNet channel means subtracted.
    Caffe,
}

impl Preprocess {
    /// ImageNet means in BGR order.
    pub const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preprocess::Raw => "raw",
            Preprocess::Caffe => "caffe",
        }
    }

    /// Append `tensor` to `out` in CHW order.
    pub fn extend_chw(&self, tensor: &ImageTensor, out: &mut Vec<f32>) {
        let plane = tensor.width as usize * tensor.height as usize;
        let start = out.len();
        out.resize(start + plane * ImageTensor::CHANNELS, 0.0);
        let dst = &mut out[start..];
        for (i, px) in tensor.data.chunks_exact(ImageTensor::CHANNELS).enumerate() {
            match self {
                Preprocess::Raw => {
                    dst[i] = px[0] as f32;
                    dst[plane + i] = px[1] as f32;
                    dst[2 * plane + i] = px[2] as f32;
                }
                Preprocess::Caffe => {
                    dst[i] = px[2] as f32 - Self::CAFFE_MEAN_BGR[0];
                    dst[plane + i] = px[1] as f32 - Self::CAFFE_MEAN_BGR[1];
                    dst[2 * plane + i] = px[0] as f32 - Self::CAFFE_MEAN_BGR[2];
                }
            }
        }
    }
}

/// A manifest row resolved against its image directory, label already encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRef {
    pub file: String,
    pub path: PathBuf,
    pub class: Option<usize>,
}
