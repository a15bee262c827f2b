//! Batch iteration for training, validation and prediction.
//!
//! Only sample references are held; images are decoded one batch at a time.

use crate::aug::TransformPipeline;
use crate::materialize::materialize;
use crate::types::{DatasetError, DatasetResult, SampleRef};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use data_contracts::ClassMap;
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Reshuffle sample order at every epoch.
    pub shuffle: bool,
    /// Drop the last partial batch.
    pub drop_last: bool,
    pub transform: TransformPipeline,
}

impl BatchConfig {
    /// Ordered, unaugmented batches (validation / prediction).
    pub fn eval(batch_size: usize, transform: TransformPipeline) -> Self {
        Self {
            batch_size,
            shuffle: false,
            drop_last: false,
            transform: TransformPipeline {
                augment: None,
                ..transform
            },
        }
    }
}

pub struct ImageBatch<B: Backend> {
    /// `[N, 3, H, W]`.
    pub images: Tensor<B, 4>,
    /// One-hot `[N, C]`, present when every sample is labeled.
    pub targets: Option<Tensor<B, 2>>,
    pub class_ids: Option<Vec<usize>>,
    pub files: Vec<String>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Finite, restartable producer of batches.
pub struct BatchIter {
    samples: Vec<SampleRef>,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    cfg: BatchConfig,
    classes: ClassMap,
    labeled: bool,
    processed_samples: usize,
    processed_batches: usize,
    started: Instant,
    total_load_time: Duration,
    total_assemble_time: Duration,
    last_log: Instant,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
    trace_path: Option<PathBuf>,
    trace_file: Option<std::fs::File>,
}

impl BatchIter {
    pub fn new(samples: Vec<SampleRef>, classes: ClassMap, cfg: BatchConfig) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(DatasetError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        cfg.transform.resolution.validate()?;
        if let Some(aug) = &cfg.transform.augment {
            aug.validate()?;
        }
        let labeled_count = samples.iter().filter(|s| s.class.is_some()).count();
        if labeled_count != 0 && labeled_count != samples.len() {
            return Err(DatasetError::InvalidConfig(format!(
                "{} of {} samples carry a label; expected all or none",
                labeled_count,
                samples.len()
            )));
        }
        if let Some(bad) = samples
            .iter()
            .find(|s| s.class.is_some_and(|c| c >= classes.len()))
        {
            return Err(DatasetError::InvalidConfig(format!(
                "class index for {} outside {} classes",
                bad.file,
                classes.len()
            )));
        }
        let labeled = !samples.is_empty() && labeled_count == samples.len();
        let log_every_samples = match std::env::var("TRICLASS_LOG_EVERY") {
            Ok(val) => {
                if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                    None
                } else {
                    val.parse::<usize>().ok().filter(|v| *v > 0)
                }
            }
            Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        };
        let trace_path = std::env::var("TRICLASS_TRACE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        let now = Instant::now();
        let mut iter = Self {
            order: (0..samples.len()).collect(),
            samples,
            cursor: 0,
            epoch: 0,
            cfg,
            classes,
            labeled,
            processed_samples: 0,
            processed_batches: 0,
            started: now,
            total_load_time: Duration::ZERO,
            total_assemble_time: Duration::ZERO,
            last_log: now,
            last_logged_samples: 0,
            log_every_samples,
            trace_path,
            trace_file: None,
        };
        iter.restart(0);
        Ok(iter)
    }

    /// Override `TRICLASS_TRACE`: append one JSON record per batch to `path`.
    pub fn with_trace_path(mut self, path: Option<PathBuf>) -> Self {
        self.trace_path = path;
        self.trace_file = None;
        self
    }

    /// Override `TRICLASS_LOG_EVERY`; `None` silences progress lines.
    pub fn with_log_every(mut self, samples: Option<usize>) -> Self {
        self.log_every_samples = samples.filter(|v| *v > 0);
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_labeled(&self) -> bool {
        self.labeled
    }

    pub fn num_batches(&self) -> usize {
        let n = self.samples.len();
        let bs = self.cfg.batch_size;
        if self.cfg.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        }
    }

    /// Rewind for `epoch`. Shuffled order depends only on the pipeline seed and the epoch.
    pub fn restart(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.cursor = 0;
        self.order = (0..self.samples.len()).collect();
        if self.cfg.shuffle {
            let seed = self.cfg.transform.seed.wrapping_add(epoch as u64);
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            self.order.shuffle(&mut rng);
        }
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<ImageBatch<B>>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let batch_size = self.cfg.batch_size;
        let end = (self.cursor + batch_size).min(self.order.len());
        if self.cfg.drop_last && end - self.cursor < batch_size {
            self.cursor = self.order.len();
            return Ok(None);
        }
        let positions: Vec<usize> = (self.cursor..end).collect();
        self.cursor = end;

        let resolution = self.cfg.transform.resolution;
        let pipeline = &self.cfg.transform;
        let epoch = self.epoch;
        let order = &self.order;
        let samples = &self.samples;

        let t_load = Instant::now();
        let mut loaded: Vec<(usize, DatasetResult<Vec<f32>>)> = positions
            .par_iter()
            .map(|&pos| {
                let sample = &samples[order[pos]];
                let res = materialize(&sample.path, resolution).and_then(|tensor| {
                    if tensor.resolution() != resolution {
                        return Err(DatasetError::ShapeMismatch {
                            what: sample.file.clone(),
                            expected: resolution.to_string(),
                            actual: tensor.resolution().to_string(),
                        });
                    }
                    let mut chw = Vec::with_capacity(resolution.pixels() * 3);
                    pipeline.apply(&tensor, epoch, order[pos], &mut chw);
                    Ok(chw)
                });
                (pos, res)
            })
            .collect();
        loaded.sort_by_key(|(pos, _)| *pos);
        let load_elapsed = t_load.elapsed();

        let t_assemble = Instant::now();
        let batch_len = loaded.len();
        let num_classes = self.classes.len();
        let mut images = Vec::with_capacity(batch_len * resolution.pixels() * 3);
        let mut targets = Vec::with_capacity(batch_len * num_classes);
        let mut class_ids = Vec::with_capacity(batch_len);
        let mut files = Vec::with_capacity(batch_len);
        for (pos, res) in loaded {
            let chw = res?;
            let sample = &self.samples[self.order[pos]];
            images.extend_from_slice(&chw);
            files.push(sample.file.clone());
            if let Some(class) = sample.class {
                let one_hot = self
                    .classes
                    .one_hot(class)
                    .map_err(|source| DatasetError::Label {
                        file: sample.file.clone(),
                        source,
                    })?;
                targets.extend_from_slice(&one_hot);
                class_ids.push(class);
            }
        }

        let image_shape = [
            batch_len,
            3,
            resolution.height as usize,
            resolution.width as usize,
        ];
        let images = Tensor::<B, 4>::from_data(TensorData::new(images, image_shape), device);
        let (targets, class_ids) = if self.labeled {
            let t = Tensor::<B, 2>::from_data(
                TensorData::new(targets, [batch_len, num_classes]),
                device,
            );
            (Some(t), Some(class_ids))
        } else {
            (None, None)
        };
        let assemble_elapsed = t_assemble.elapsed();

        self.processed_samples += batch_len;
        self.processed_batches += 1;
        self.total_load_time += load_elapsed;
        self.total_assemble_time += assemble_elapsed;
        self.maybe_trace(batch_len, load_elapsed, assemble_elapsed);
        self.maybe_log_progress();

        Ok(Some(ImageBatch {
            images,
            targets,
            class_ids,
            files,
        }))
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.log_every_samples else {
            return;
        };
        let processed_since = self
            .processed_samples
            .saturating_sub(self.last_logged_samples);
        let since_last = self.last_log.elapsed();
        if processed_since < threshold && since_last < Duration::from_secs(30) {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let rate = self.processed_samples as f32 / secs;
        let batches = self.processed_batches.max(1) as f64;
        eprintln!(
            "[dataset] epoch={} batches={} samples={} elapsed={:.1}s rate={:.1} img/s avg_load_ms={:.2} avg_assemble_ms={:.2}",
            self.epoch,
            self.processed_batches,
            self.processed_samples,
            secs,
            rate,
            self.total_load_time.as_secs_f64() * 1000.0 / batches,
            self.total_assemble_time.as_secs_f64() * 1000.0 / batches,
        );
        self.last_logged_samples = self.processed_samples;
        self.last_log = Instant::now();
    }

    fn maybe_trace(&mut self, batch_len: usize, load_elapsed: Duration, assemble_elapsed: Duration) {
        let Some(path) = &self.trace_path else {
            return;
        };
        if self.trace_file.is_none() {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(f) => self.trace_file = Some(f),
                Err(e) => {
                    eprintln!("Failed to open trace file {}: {e}", path.display());
                    self.trace_path = None;
                    return;
                }
            }
        }
        let Some(file) = self.trace_file.as_mut() else {
            return;
        };
        let record = serde_json::json!({
            "epoch": self.epoch,
            "batch": self.processed_batches,
            "samples": batch_len,
            "width": self.cfg.transform.resolution.width,
            "height": self.cfg.transform.resolution.height,
            "augmented": self.cfg.transform.augments(),
            "load_ms": load_elapsed.as_secs_f64() * 1000.0,
            "assemble_ms": assemble_elapsed.as_secs_f64() * 1000.0,
            "timestamp_ms": self.started.elapsed().as_millis() as u64
        });
        if let Err(e) = writeln!(file, "{}", record) {
            eprintln!("Failed to write trace record: {e}");
            self.trace_path = None;
            self.trace_file = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aug::{AugmentConfig, TransformPipelineBuilder};
    use crate::types::Resolution;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    type B = burn_ndarray::NdArray<f32>;

    fn samples(dir: &Path, n: usize) -> Vec<SampleRef> {
        (0..n)
            .map(|i| {
                let file = format!("s{i}.png");
                let path = dir.join(&file);
                RgbImage::from_pixel(6, 5, Rgb([i as u8, 0, 0]))
                    .save(&path)
                    .unwrap();
                SampleRef {
                    file,
                    path,
                    class: Some(i % 3),
                }
            })
            .collect()
    }

    fn config(batch_size: usize) -> BatchConfig {
        let pipeline = TransformPipelineBuilder::new()
            .resolution(Resolution::square(4))
            .build();
        BatchConfig::eval(batch_size, pipeline)
    }

    #[test]
    fn trace_writes_one_record_per_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let trace = tmp.path().join("logs").join("trace.jsonl");
        let mut iter = BatchIter::new(samples(tmp.path(), 5), ClassMap::default(), config(2))
            .unwrap()
            .with_trace_path(Some(trace.clone()))
            .with_log_every(None);
        let device = Default::default();
        let mut sizes = Vec::new();
        while let Some(batch) = iter.next_batch::<B>(&device).unwrap() {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);

        let body = std::fs::read_to_string(&trace).unwrap();
        let records: Vec<serde_json::Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        for (i, rec) in records.iter().enumerate() {
            assert_eq!(rec["batch"], i + 1);
            assert_eq!(rec["samples"], sizes[i]);
            assert_eq!(rec["width"], 4);
            assert_eq!(rec["augmented"], false);
        }
    }

    #[test]
    fn no_trace_path_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut iter = BatchIter::new(samples(tmp.path(), 2), ClassMap::default(), config(2))
            .unwrap()
            .with_trace_path(None)
            .with_log_every(Some(1));
        let device = Default::default();
        assert!(iter.next_batch::<B>(&device).unwrap().is_some());
        assert!(iter.next_batch::<B>(&device).unwrap().is_none());
        assert_eq!(iter.last_logged_samples, 2);
        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn unusable_augment_bounds_are_rejected_up_front() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(2);
        cfg.transform.augment = Some(AugmentConfig {
            rotation_deg: f32::INFINITY,
            ..AugmentConfig::default()
        });
        assert!(matches!(
            BatchIter::new(samples(tmp.path(), 2), ClassMap::default(), cfg),
            Err(DatasetError::InvalidConfig(_))
        ));
    }
}
