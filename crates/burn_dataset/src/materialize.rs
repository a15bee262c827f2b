//! Decoding image files into fixed-shape byte tensors.

use crate::types::{DatasetError, DatasetResult, ImageTensor, Resolution};
use image::imageops::FilterType;
use image::{ImageError, ImageReader};
use std::path::Path;

/// Resampling filter for every resize; bicubic so results are stable across runs.
pub const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// Decode `path`, convert to RGB and resize to `resolution`.
///
/// The reader (and its file handle) is dropped once decoding finishes; only the
/// resized pixels leave this function.
pub fn materialize(path: &Path, resolution: Resolution) -> DatasetResult<ImageTensor> {
    let rgb = decode_rgb(path)?;
    Ok(resize_to(rgb, resolution))
}

/// Resolve `file` under `base_dir`, then [`materialize`] it.
pub fn materialize_file(
    base_dir: &Path,
    file: &str,
    resolution: Resolution,
) -> DatasetResult<ImageTensor> {
    materialize(&base_dir.join(file), resolution)
}

fn decode_rgb(path: &Path) -> DatasetResult<image::RgbImage> {
    let decode_err = |source: ImageError| DatasetError::ImageDecode {
        path: path.to_path_buf(),
        source,
    };
    let reader = ImageReader::open(path)
        .map_err(|e| decode_err(ImageError::IoError(e)))?
        .with_guessed_format()
        .map_err(|e| decode_err(ImageError::IoError(e)))?;
    let img = reader.decode().map_err(|e| match e {
        ImageError::Unsupported(u) => DatasetError::UnsupportedFormat {
            path: path.to_path_buf(),
            msg: u.to_string(),
        },
        other => decode_err(other),
    })?;
    Ok(img.to_rgb8())
}

pub fn resize_to(img: image::RgbImage, resolution: Resolution) -> ImageTensor {
    if img.dimensions() == (resolution.width, resolution.height) {
        return ImageTensor::from_rgb(img);
    }
    let resized = image::imageops::resize(&img, resolution.width, resolution.height, RESIZE_FILTER);
    ImageTensor::from_rgb(resized)
}
