use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::tensor::backend::Backend;
use burn_dataset::{
    preflight, split_indices, BatchConfig, BatchIter, SampleRef, TransformPipelineBuilder,
};
use clap::Parser;
use cli_support::{validate_backend_choice, BackendKind, DatasetArgs, Variant};
use data_contracts::ClassMap;
use inference::cli::write_submission;
use inference::{predict_test_set, save_checkpoint, Architecture, RunCard, DEFAULT_SUBMISSION};
use models::{ImageClassifier, NetworkSpec, SequentialNet, TransferNetConfig};
use std::path::PathBuf;

use crate::config::{TrainConfig, TrainConfigFile};
use crate::trainer::{fit, MetricsSink, TrainOutcome};
use crate::TrainBackend;

type ADBackend = Autodiff<TrainBackend>;

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train the three-class image classifier, validate it and write a submission"
)]
pub struct TrainArgs {
    /// Model family and training preset.
    #[arg(long, value_enum, default_value_t = Variant::Shallow)]
    pub variant: Variant,
    /// Optional TOML file overriding the preset (`[train]`, `[augment]`, `[backbone]`).
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[command(flatten)]
    pub dataset: DatasetArgs,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub lr: Option<f64>,
    /// Early-stopping patience in epochs; 0 disables.
    #[arg(long)]
    pub patience: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub val_ratio: Option<f64>,
    /// Disable training-time augmentation.
    #[arg(long, default_value_t = false)]
    pub no_augment: bool,
    /// Burn record with pretrained backbone parameters (required by the transfer variant).
    #[arg(long)]
    pub backbone_weights: Option<PathBuf>,
    /// Let the transfer variant train its head on a randomly initialized backbone.
    #[arg(long, default_value_t = false)]
    pub allow_random_backbone: bool,
    /// Checkpoint directory (defaults to `checkpoints/<variant>`).
    #[arg(long)]
    pub checkpoint_out: Option<PathBuf>,
    /// Per-epoch metrics as JSON lines.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
    /// Submission CSV path.
    #[arg(long, default_value = DEFAULT_SUBMISSION)]
    pub output: PathBuf,
}

/// Preset for the variant, then the config file, then command-line flags.
pub fn resolve_config(args: &TrainArgs) -> anyhow::Result<TrainConfig> {
    let mut cfg = TrainConfig::preset(args.variant);
    if let Some(path) = &args.config {
        cfg.apply_file(TrainConfigFile::from_path(path)?);
    }
    if let Some(v) = args.epochs {
        cfg.epochs = v;
    }
    if let Some(v) = args.batch_size {
        cfg.batch_size = v;
    }
    if let Some(v) = args.lr {
        cfg.learning_rate = v;
    }
    if let Some(v) = args.patience {
        cfg.patience = (v > 0).then_some(v);
    }
    if let Some(v) = args.seed {
        cfg.seed = v;
    }
    if let Some(v) = args.val_ratio {
        cfg.val_ratio = v;
    }
    if args.no_augment {
        cfg.augment = burn_dataset::AugmentConfig::none();
    }
    cfg.validate()?;
    Ok(cfg)
}

/// The transfer variant needs pretrained backbone weights unless the caller opts out.
fn check_backbone_source(args: &TrainArgs, cfg: &TrainConfig) -> anyhow::Result<()> {
    if cfg.variant != Variant::Transfer {
        return Ok(());
    }
    match &args.backbone_weights {
        Some(path) if !path.is_file() => {
            anyhow::bail!("backbone weights {} not found", path.display())
        }
        Some(_) => Ok(()),
        None if args.allow_random_backbone => Ok(()),
        None => anyhow::bail!(
            "the transfer variant needs --backbone-weights <record.bin>; pass --allow-random-backbone to train on a randomly initialized backbone"
        ),
    }
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub outcome: TrainOutcome,
    pub checkpoint_dir: PathBuf,
    pub submission_path: PathBuf,
    pub submission_rows: usize,
}

/// Everything a variant needs once the dataset has been indexed and split.
struct PreparedRun {
    cfg: TrainConfig,
    classes: ClassMap,
    train: BatchIter,
    val: BatchIter,
    test: Vec<SampleRef>,
    id_column: String,
    checkpoint_dir: PathBuf,
    output: PathBuf,
    metrics: Option<MetricsSink>,
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainReport> {
    validate_backend_choice(args.backend, cfg!(feature = "backend-wgpu"))?;
    let cfg = resolve_config(&args)?;
    check_backbone_source(&args, &cfg)?;
    println!("config: {}", cfg.describe());

    let layout = args.dataset.layout();
    let (train_manifest, test_manifest) = layout.load_indexes()?;
    let classes = ClassMap::default();

    let train_samples = train_manifest.resolve(&layout.train_image_dir(), Some(&classes))?;
    let summary = preflight(&train_samples, &classes)?;
    println!("train manifest: {}", summary.describe(&classes));
    let test_samples = test_manifest.resolve(&layout.test_image_dir(), None)?;
    let summary = preflight(&test_samples, &classes)?;
    println!("test manifest: {}", summary.describe(&classes));

    let split = split_indices(train_samples.len(), cfg.val_ratio, cfg.seed)?;
    let (train_split, val_split) = split.apply(&train_samples);
    println!(
        "split: train={} val={} (ratio {}, seed {})",
        train_split.len(),
        val_split.len(),
        cfg.val_ratio,
        cfg.seed
    );

    let pipeline = TransformPipelineBuilder::new()
        .resolution(cfg.resolution)
        .augment((!cfg.augment.is_disabled()).then_some(cfg.augment))
        .preprocess(cfg.preprocess)
        .seed(cfg.seed)
        .build();
    println!("pipeline: {}", pipeline.describe());
    let train = BatchIter::new(
        train_split,
        classes.clone(),
        BatchConfig {
            batch_size: cfg.batch_size,
            shuffle: true,
            drop_last: false,
            transform: pipeline.clone(),
        },
    )?;
    let val = BatchIter::new(
        val_split,
        classes.clone(),
        BatchConfig::eval(cfg.batch_size, pipeline),
    )?;

    let metrics = args
        .metrics_out
        .as_deref()
        .map(MetricsSink::create)
        .transpose()?;
    let checkpoint_dir = args
        .checkpoint_out
        .clone()
        .unwrap_or_else(|| PathBuf::from("checkpoints").join(cfg.variant.as_str()));

    let device = <ADBackend as Backend>::Device::default();
    <ADBackend as Backend>::seed(cfg.seed);

    let run = PreparedRun {
        classes,
        train,
        val,
        test: test_samples,
        id_column: test_manifest.id_column.clone(),
        checkpoint_dir,
        output: args.output.clone(),
        metrics,
        cfg,
    };

    let variant = run.cfg.variant;
    match variant {
        Variant::Shallow => {
            let side = run.cfg.resolution.width as usize;
            let spec = NetworkSpec::shallow_cnn(side, run.classes.len());
            let model = SequentialNet::<ADBackend>::new(spec.clone(), &device)?;
            println!("architecture: {}", spec.describe());
            train_and_submit(model, Architecture::Sequential { spec }, run, &device)
        }
        Variant::Transfer => {
            let config = TransferNetConfig {
                backbone: run.cfg.backbone.clone(),
                input_side: run.cfg.resolution.width as usize,
                hidden: run.cfg.head_units,
                num_classes: run.classes.len(),
            };
            let mut model = config.init::<ADBackend>(&device)?;
            match &args.backbone_weights {
                Some(path) => {
                    model = model.with_backbone_weights(path, &device).map_err(|e| {
                        anyhow::anyhow!("failed to load backbone weights {}: {e}", path.display())
                    })?;
                    println!("loaded backbone weights from {}", path.display());
                }
                None => eprintln!(
                    "warning: --allow-random-backbone set; training the head on a randomly initialized frozen backbone"
                ),
            }
            let architecture = Architecture::Transfer { config };
            println!("architecture: {}", architecture.describe());
            train_and_submit(model, architecture, run, &device)
        }
    }
}

fn train_and_submit<M>(
    model: M,
    architecture: Architecture,
    mut run: PreparedRun,
    device: &<ADBackend as Backend>::Device,
) -> anyhow::Result<TrainReport>
where
    M: ImageClassifier<ADBackend> + AutodiffModule<ADBackend>,
    M::InnerModule: ImageClassifier<TrainBackend>,
{
    let (model, outcome) = fit(
        model,
        &mut run.train,
        &mut run.val,
        &run.cfg,
        device,
        run.metrics.as_mut(),
    )?;
    println!("Validation Loss: {:.4}", outcome.val_loss);
    println!("Validation Accuracy: {:.4}", outcome.val_accuracy);

    let card = RunCard {
        variant: run.cfg.variant,
        resolution: run.cfg.resolution,
        preprocess: run.cfg.preprocess,
        classes: run.classes.clone(),
        architecture,
        seed: run.cfg.seed,
        epochs_run: outcome.epochs_run,
        best_epoch: outcome.restored_epoch,
        val_loss: Some(outcome.val_loss),
        val_accuracy: Some(outcome.val_accuracy),
    };
    let trained = model.valid();
    let record = save_checkpoint::<TrainBackend, _>(trained.clone(), &card, &run.checkpoint_dir)?;
    println!("Saved checkpoint to {}", record.display());

    let submission = predict_test_set::<TrainBackend, _>(
        &trained,
        run.test,
        &run.classes,
        card.eval_pipeline(),
        run.cfg.batch_size,
        &run.id_column,
        device,
    )?;
    write_submission(&submission, &run.output)?;

    Ok(TrainReport {
        outcome,
        checkpoint_dir: run.checkpoint_dir,
        submission_path: run.output,
        submission_rows: submission.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_the_preset() {
        let args = TrainArgs::parse_from([
            "train",
            "--variant",
            "transfer",
            "--epochs",
            "2",
            "--patience",
            "0",
            "--no-augment",
        ]);
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.epochs, 2);
        assert_eq!(cfg.patience, None);
        assert!(cfg.augment.is_disabled());
        assert_eq!(cfg.resolution.width, 224);
    }

    #[test]
    fn config_file_sits_between_preset_and_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.toml");
        std::fs::write(&path, "[train]\nepochs = 7\nbatch_size = 4\n").unwrap();
        let args = TrainArgs::parse_from([
            "train",
            "--config",
            path.to_str().unwrap(),
            "--batch-size",
            "8",
        ]);
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.epochs, 7);
        assert_eq!(cfg.batch_size, 8);
    }

    #[test]
    fn transfer_without_backbone_weights_needs_explicit_opt_out() {
        let args = TrainArgs::parse_from(["train", "--variant", "transfer"]);
        let cfg = resolve_config(&args).unwrap();
        let err = check_backbone_source(&args, &cfg).unwrap_err();
        assert!(err.to_string().contains("--backbone-weights"), "{err}");

        let args = TrainArgs::parse_from(["train", "--variant", "transfer", "--allow-random-backbone"]);
        assert!(check_backbone_source(&args, &cfg).is_ok());

        let args = TrainArgs::parse_from([
            "train",
            "--variant",
            "transfer",
            "--backbone-weights",
            "/nonexistent/backbone.bin",
        ]);
        assert!(check_backbone_source(&args, &cfg).is_err());

        let args = TrainArgs::parse_from(["train"]);
        let cfg = resolve_config(&args).unwrap();
        assert!(check_backbone_source(&args, &cfg).is_ok());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = TrainArgs::parse_from(["train", "--config", "/nonexistent/run.toml"]);
        assert!(resolve_config(&args).is_err());
    }
}
