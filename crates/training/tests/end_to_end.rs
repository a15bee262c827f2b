//! Full train → validate → checkpoint → submission runs on synthetic datasets.

mod common;

use clap::Parser;
use common::{read_submission, write_dataset, CLASSES};
use burn::tensor::Tensor;
use inference::{load_record, run_predict, Architecture, PredictArgs, RunCard};
use models::ResNetConfig;
use training::{run_train, TrainArgs, TrainBackend};

#[test]
fn shallow_run_writes_one_row_per_test_file_in_manifest_order() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    let test_files = write_dataset(&data, 100, 10)?;
    let out = tmp.path().join("out");

    let args = TrainArgs::parse_from([
        "train".to_string(),
        "--data-root".into(),
        data.display().to_string(),
        "--epochs".into(),
        "2".into(),
        "--checkpoint-out".into(),
        out.join("ckpt").display().to_string(),
        "--metrics-out".into(),
        out.join("metrics.jsonl").display().to_string(),
        "--output".into(),
        out.join("submission.csv").display().to_string(),
    ]);
    let report = run_train(args)?;
    assert_eq!(report.outcome.epochs_run, 2);
    assert_eq!(report.submission_rows, 10);
    assert!(report.outcome.val_loss.is_finite());
    assert!((0.0..=1.0).contains(&report.outcome.val_accuracy));

    let rows = read_submission(&report.submission_path)?;
    assert_eq!(rows.len(), 10);
    let files: Vec<String> = rows.iter().map(|(f, _)| f.clone()).collect();
    assert_eq!(files, test_files);
    for (_, label) in &rows {
        assert!(CLASSES.contains(&label.as_str()), "unexpected label {label}");
    }

    let metrics = std::fs::read_to_string(out.join("metrics.jsonl"))?;
    let lines: Vec<serde_json::Value> = metrics
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["epoch"], 1);
    assert!(lines[0]["val_accuracy"].is_number());

    let card = RunCard::load(&report.checkpoint_dir)?;
    assert_eq!(card.epochs_run, 2);
    let names: Vec<&str> = card.classes.names().iter().map(String::as_str).collect();
    assert_eq!(names, CLASSES);

    // The standalone predictor must reproduce the training-time submission.
    let again = out.join("predicted.csv");
    run_predict(PredictArgs::parse_from([
        "predict".to_string(),
        "--checkpoint".into(),
        report.checkpoint_dir.display().to_string(),
        "--data-root".into(),
        data.display().to_string(),
        "--output".into(),
        again.display().to_string(),
    ]))?;
    assert_eq!(std::fs::read(&again)?, std::fs::read(&report.submission_path)?);
    Ok(())
}

#[test]
fn transfer_run_with_small_backbone_and_early_stopping() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    write_dataset(&data, 24, 5)?;
    let config = tmp.path().join("transfer.toml");
    std::fs::write(
        &config,
        "[train]\nepochs = 3\npatience = 1\nresolution = 32\nhead_units = 8\nbatch_size = 8\n\n[backbone]\nblocks = [1, 1, 1, 1]\nbase_width = 4\n",
    )?;

    let args = TrainArgs::parse_from([
        "train".to_string(),
        "--variant".into(),
        "transfer".into(),
        "--config".into(),
        config.display().to_string(),
        "--data-root".into(),
        data.display().to_string(),
        "--checkpoint-out".into(),
        tmp.path().join("ckpt").display().to_string(),
        "--output".into(),
        tmp.path().join("submission.csv").display().to_string(),
        "--allow-random-backbone".into(),
    ]);
    let report = run_train(args)?;
    let outcome = &report.outcome;
    assert!(outcome.epochs_run >= 1 && outcome.epochs_run <= 3);
    let best = outcome.restored_epoch.expect("early stopping restores an epoch");
    let best_loss = outcome
        .history
        .iter()
        .map(|m| m.val_loss)
        .fold(f32::INFINITY, f32::min);
    assert_eq!(outcome.history[best].val_loss, best_loss);
    // Final scores come from the restored weights, not the last epoch.
    assert!(
        (outcome.val_loss - outcome.history[best].val_loss).abs() < 1e-5,
        "final {} vs best epoch {}",
        outcome.val_loss,
        outcome.history[best].val_loss
    );
    assert_eq!(report.submission_rows, 5);

    let card = RunCard::load(&report.checkpoint_dir)?;
    assert_eq!(card.preprocess.as_str(), "caffe");
    assert!(matches!(card.architecture, Architecture::Transfer { .. }));
    Ok(())
}

#[test]
fn transfer_run_keeps_pretrained_backbone_weights() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    write_dataset(&data, 12, 3)?;
    let device = Default::default();

    let pretrained = ResNetConfig::tiny().init::<TrainBackend>(&device);
    let ones_input = || Tensor::<TrainBackend, 4>::ones([1, 3, 32, 32], &device);
    let expected = pretrained
        .forward(ones_input())
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let weights = tmp.path().join("backbone.bin");
    pretrained
        .save_weights(&weights)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let config = tmp.path().join("transfer.toml");
    std::fs::write(
        &config,
        "[train]\nepochs = 2\nresolution = 32\nhead_units = 8\nbatch_size = 4\n\n[backbone]\nblocks = [1, 1, 1, 1]\nbase_width = 4\n",
    )?;
    let args = TrainArgs::parse_from([
        "train".to_string(),
        "--variant".into(),
        "transfer".into(),
        "--config".into(),
        config.display().to_string(),
        "--data-root".into(),
        data.display().to_string(),
        "--backbone-weights".into(),
        weights.display().to_string(),
        "--checkpoint-out".into(),
        tmp.path().join("ckpt").display().to_string(),
        "--output".into(),
        tmp.path().join("submission.csv").display().to_string(),
    ]);
    let report = run_train(args)?;
    assert_eq!(report.submission_rows, 3);

    let card = RunCard::load(&report.checkpoint_dir)?;
    let Architecture::Transfer { config } = card.architecture else {
        panic!("expected a transfer checkpoint");
    };
    let model = config.init::<TrainBackend>(&device)?;
    let model = load_record(model, &report.checkpoint_dir, &device)?;
    let actual = model
        .backbone()
        .forward(ones_input())
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(&expected) {
        assert!((a - e).abs() < 1e-6, "backbone drifted: {a} vs {e}");
    }
    Ok(())
}

#[test]
fn transfer_without_backbone_weights_is_refused() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    write_dataset(&data, 6, 2)?;
    let output = tmp.path().join("submission.csv");
    let args = TrainArgs::parse_from([
        "train".to_string(),
        "--variant".into(),
        "transfer".into(),
        "--data-root".into(),
        data.display().to_string(),
        "--output".into(),
        output.display().to_string(),
    ]);
    let err = run_train(args).unwrap_err();
    assert!(err.to_string().contains("--allow-random-backbone"), "{err}");
    assert!(!output.exists());
    Ok(())
}

#[test]
fn unknown_training_label_aborts_before_training() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    write_dataset(&data, 6, 2)?;
    let manifest = data.join("train_files.csv");
    let body = std::fs::read_to_string(&manifest)?.replacen("vehicle", "truck", 1);
    std::fs::write(&manifest, body)?;

    let output = tmp.path().join("submission.csv");
    let args = TrainArgs::parse_from([
        "train".to_string(),
        "--data-root".into(),
        data.display().to_string(),
        "--output".into(),
        output.display().to_string(),
        "--checkpoint-out".into(),
        tmp.path().join("ckpt").display().to_string(),
    ]);
    let err = run_train(args).unwrap_err();
    assert!(err.to_string().contains("img_000.jpg"), "{err}");
    assert!(!output.exists());
    Ok(())
}

#[test]
fn missing_test_image_aborts_without_a_submission() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    let test_files = write_dataset(&data, 6, 3)?;
    std::fs::remove_file(data.join("test").join(&test_files[1]))?;

    let output = tmp.path().join("submission.csv");
    let args = TrainArgs::parse_from([
        "train".to_string(),
        "--data-root".into(),
        data.display().to_string(),
        "--output".into(),
        output.display().to_string(),
    ]);
    let err = run_train(args).unwrap_err();
    assert!(err.to_string().contains(&test_files[1]), "{err}");
    assert!(!output.exists());
    Ok(())
}
