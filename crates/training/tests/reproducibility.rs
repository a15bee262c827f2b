//! Kept alone in its own test binary: the CPU backend seeds a process-wide RNG.

mod common;

use clap::Parser;
use training::{run_train, TrainArgs};

#[test]
fn identical_inputs_and_seed_give_byte_identical_submissions() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    common::write_dataset(&data, 30, 6)?;

    let run = |name: &str| -> anyhow::Result<Vec<u8>> {
        let out = tmp.path().join(name);
        let args = TrainArgs::parse_from([
            "train".to_string(),
            "--data-root".into(),
            data.display().to_string(),
            "--epochs".into(),
            "2".into(),
            "--batch-size".into(),
            "8".into(),
            "--checkpoint-out".into(),
            out.join("ckpt").display().to_string(),
            "--output".into(),
            out.join("submission.csv").display().to_string(),
        ]);
        let report = run_train(args)?;
        Ok(std::fs::read(report.submission_path)?)
    };

    let first = run("a")?;
    let second = run("b")?;
    assert!(!first.is_empty());
    assert_eq!(first, second);
    Ok(())
}
