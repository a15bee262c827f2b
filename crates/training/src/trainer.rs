//! Epoch loop: Adam on one-hot categorical cross-entropy, validation after every
//! epoch, optional early stopping with best-weights restore.

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use burn_dataset::BatchIter;
use inference::argmax;
use models::ImageClassifier;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{TrainConfig, ADAM_EPSILON};

/// Mean categorical cross-entropy of `logits` against one-hot `targets`.
pub fn cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    (targets * log_softmax(logits, 1)).sum_dim(1).mean().neg()
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or(f32::NAN)
}

fn correct<B: Backend>(logits: Tensor<B, 2>, class_ids: &[usize]) -> anyhow::Result<usize> {
    let num_classes = logits.dims()[1];
    let values = logits
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("failed to read logits: {e:?}"))?;
    Ok(values
        .chunks(num_classes)
        .zip(class_ids)
        .filter(|(row, id)| argmax(row) == **id)
        .count())
}

/// Loss/accuracy accumulated over a pass, weighted by batch size.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    loss_sum: f64,
    correct: usize,
    seen: usize,
}

impl Tally {
    fn add(&mut self, loss: f32, correct: usize, n: usize) {
        self.loss_sum += loss as f64 * n as f64;
        self.correct += correct;
        self.seen += n;
    }

    fn loss(&self) -> f32 {
        if self.seen == 0 {
            f32::NAN
        } else {
            (self.loss_sum / self.seen as f64) as f32
        }
    }

    fn accuracy(&self) -> f32 {
        if self.seen == 0 {
            0.0
        } else {
            self.correct as f32 / self.seen as f32
        }
    }
}

/// `(loss, accuracy)` of `model` over every labeled batch of `batches`.
pub fn evaluate<B: Backend, M: ImageClassifier<B>>(
    model: &M,
    batches: &mut BatchIter,
    device: &B::Device,
) -> anyhow::Result<(f32, f32)> {
    batches.restart(0);
    let mut tally = Tally::default();
    while let Some(batch) = batches.next_batch::<B>(device)? {
        let (Some(targets), Some(ids)) = (batch.targets, batch.class_ids) else {
            anyhow::bail!("evaluation needs labeled batches");
        };
        let logits = model.logits(batch.images);
        let loss = scalar(cross_entropy(logits.clone(), targets));
        tally.add(loss, correct(logits, &ids)?, ids.len());
    }
    Ok((tally.loss(), tally.accuracy()))
}

/// Stops once validation loss has not improved for `patience` epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f32,
    best: f32,
    best_epoch: Option<usize>,
    wait: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopDecision {
    pub improved: bool,
    pub stop: bool,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            min_delta: 0.0,
            best: f32::INFINITY,
            best_epoch: None,
            wait: 0,
        }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn best_loss(&self) -> f32 {
        self.best
    }

    pub fn observe(&mut self, epoch: usize, val_loss: f32) -> StopDecision {
        let improved = val_loss < self.best - self.min_delta;
        if improved {
            self.best = val_loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;
        } else {
            self.wait += 1;
        }
        StopDecision {
            improved,
            stop: self.wait >= self.patience,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
    pub improved: bool,
}

/// Appends one JSON object per epoch.
pub struct MetricsSink {
    path: PathBuf,
    file: std::fs::File,
}

impl MetricsSink {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)
            .map_err(|e| anyhow::anyhow!("failed to create metrics file {}: {e}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn record(&mut self, metrics: &EpochMetrics, elapsed_ms: u128) -> anyhow::Result<()> {
        let record = serde_json::json!({
            "epoch": metrics.epoch,
            "loss": metrics.loss,
            "accuracy": metrics.accuracy,
            "val_loss": metrics.val_loss,
            "val_accuracy": metrics.val_accuracy,
            "improved": metrics.improved,
            "elapsed_ms": elapsed_ms as u64,
        });
        writeln!(self.file, "{record}")
            .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", self.path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub history: Vec<EpochMetrics>,
    pub epochs_run: usize,
    /// Set when early stopping was enabled and the best epoch was restored.
    pub restored_epoch: Option<usize>,
    pub val_loss: f32,
    pub val_accuracy: f32,
}

/// Train `model` for up to `cfg.epochs` epochs and return it with its final
/// validation scores (measured after any best-weights restore).
pub fn fit<B, M>(
    mut model: M,
    train: &mut BatchIter,
    val: &mut BatchIter,
    cfg: &TrainConfig,
    device: &B::Device,
    mut metrics: Option<&mut MetricsSink>,
) -> anyhow::Result<(M, TrainOutcome)>
where
    B: AutodiffBackend,
    M: ImageClassifier<B> + AutodiffModule<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
{
    if train.is_empty() {
        anyhow::bail!("no training samples");
    }
    if !train.is_labeled() || !val.is_labeled() {
        anyhow::bail!("training and validation samples must all be labeled");
    }
    let mut optim = AdamConfig::new().with_epsilon(ADAM_EPSILON).init();
    let mut stopper = cfg.patience.map(EarlyStopping::new);
    let mut best: Option<M> = None;
    let mut history = Vec::with_capacity(cfg.epochs);
    let started = Instant::now();

    for epoch in 0..cfg.epochs {
        train.restart(epoch);
        let mut tally = Tally::default();
        while let Some(batch) = train.next_batch::<B>(device)? {
            let (Some(targets), Some(ids)) = (batch.targets, batch.class_ids) else {
                anyhow::bail!("training batch without labels");
            };
            let logits = model.logits(batch.images);
            let loss = cross_entropy(logits.clone(), targets);
            let loss_val = scalar(loss.clone().detach());
            let n_correct = correct(logits.detach(), &ids)?;
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(cfg.learning_rate, model, grads);
            tally.add(loss_val, n_correct, ids.len());
        }

        let (val_loss, val_accuracy) = evaluate(&model.valid(), val, device)?;
        let decision = stopper.as_mut().map(|s| s.observe(epoch, val_loss));
        let improved = decision.is_some_and(|d| d.improved);
        if improved {
            best = Some(model.clone());
        }
        let row = EpochMetrics {
            epoch,
            loss: tally.loss(),
            accuracy: tally.accuracy(),
            val_loss,
            val_accuracy,
            improved,
        };
        println!(
            "epoch {}/{}: loss {:.4} acc {:.4} val_loss {:.4} val_acc {:.4}{}",
            epoch + 1,
            cfg.epochs,
            row.loss,
            row.accuracy,
            row.val_loss,
            row.val_accuracy,
            if improved { " *" } else { "" }
        );
        if let Some(sink) = metrics.as_deref_mut() {
            sink.record(&row, started.elapsed().as_millis())?;
        }
        history.push(row);

        if decision.is_some_and(|d| d.stop) {
            println!(
                "early stopping after epoch {}: no val_loss improvement for {} epochs",
                epoch + 1,
                cfg.patience.unwrap_or_default()
            );
            break;
        }
    }

    let restored_epoch = stopper.as_ref().and_then(|s| s.best_epoch());
    if let (Some(best_model), Some(epoch)) = (best, restored_epoch) {
        println!("restoring weights from epoch {}", epoch + 1);
        model = best_model;
    }

    let (val_loss, val_accuracy) = evaluate(&model.valid(), val, device)?;
    let epochs_run = history.len();
    Ok((
        model,
        TrainOutcome {
            history,
            epochs_run,
            restored_epoch,
            val_loss,
            val_accuracy,
        },
    ))
}
