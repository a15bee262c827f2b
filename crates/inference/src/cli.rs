use crate::checkpoint::{load_record, Architecture, RunCard};
use crate::predictor::predict_test_set;
use crate::submission::{Submission, DEFAULT_SUBMISSION};
use crate::InferenceBackend;
use burn::tensor::backend::Backend;
use burn_dataset::{preflight, SampleRef};
use clap::Parser;
use cli_support::{validate_backend_choice, BackendKind, DatasetArgs};
use models::{ImageClassifier, SequentialNet};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "predict",
    about = "Write a submission for a test manifest from a saved checkpoint"
)]
pub struct PredictArgs {
    /// Checkpoint directory holding `model.bin` and `run_card.json`.
    #[arg(long)]
    pub checkpoint: PathBuf,
    #[command(flatten)]
    pub dataset: DatasetArgs,
    /// Output CSV path.
    #[arg(long, default_value = DEFAULT_SUBMISSION)]
    pub output: PathBuf,
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
}

pub fn run_predict(args: PredictArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend, cfg!(feature = "backend-wgpu"))?;

    let card = RunCard::load(&args.checkpoint)?;
    println!(
        "checkpoint {}: variant={} resolution={} preprocess={} classes={:?}",
        args.checkpoint.display(),
        card.variant.as_str(),
        card.resolution,
        card.preprocess.as_str(),
        card.classes.names()
    );
    println!("architecture: {}", card.architecture.describe());

    let layout = args.dataset.layout();
    let test = layout.load_test()?;
    let samples = test.resolve(&layout.test_image_dir(), None)?;
    let summary = preflight(&samples, &card.classes)?;
    println!("test set: {}", summary.describe(&card.classes));

    let device = <InferenceBackend as Backend>::Device::default();
    let submission = match &card.architecture {
        Architecture::Sequential { spec } => {
            let model = SequentialNet::<InferenceBackend>::new(spec.clone(), &device)?;
            let model = load_record(model, &args.checkpoint, &device)?;
            predict_with(&model, &card, samples, &test.id_column, args.batch_size, &device)?
        }
        Architecture::Transfer { config } => {
            let model = config.init::<InferenceBackend>(&device)?;
            let model = load_record(model, &args.checkpoint, &device)?;
            predict_with(&model, &card, samples, &test.id_column, args.batch_size, &device)?
        }
    };

    write_submission(&submission, &args.output)
}

fn predict_with<B: Backend, M: ImageClassifier<B>>(
    model: &M,
    card: &RunCard,
    samples: Vec<SampleRef>,
    id_column: &str,
    batch_size: usize,
    device: &B::Device,
) -> anyhow::Result<Submission> {
    Ok(predict_test_set(
        model,
        samples,
        &card.classes,
        card.eval_pipeline(),
        batch_size,
        id_column,
        device,
    )?)
}

pub fn write_submission(submission: &Submission, path: &Path) -> anyhow::Result<()> {
    submission.write_csv(path).map_err(|e| {
        anyhow::anyhow!("failed to write submission {}: {e}", path.display())
    })?;
    println!(
        "Wrote {} predictions to {}",
        submission.len(),
        path.display()
    );
    Ok(())
}
