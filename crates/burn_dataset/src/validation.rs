//! Dataset preflight: every referenced image must exist before training starts.

use crate::types::{DatasetError, DatasetResult, SampleRef};
use data_contracts::ClassMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub total: usize,
    pub unlabeled: usize,
    /// Count per class name, in class-map order when printed.
    pub per_class: BTreeMap<String, usize>,
    /// Identifiers whose image file is absent.
    pub missing: Vec<String>,
}

impl DatasetSummary {
    pub fn ensure_complete(&self) -> DatasetResult<()> {
        match self.missing.first() {
            None => Ok(()),
            Some(first) => Err(DatasetError::MissingImages {
                missing: self.missing.len(),
                total: self.total,
                first: first.clone(),
            }),
        }
    }

    pub fn describe(&self, classes: &ClassMap) -> String {
        let counts: Vec<String> = classes
            .names()
            .iter()
            .map(|n| format!("{n}={}", self.per_class.get(n).copied().unwrap_or(0)))
            .collect();
        format!(
            "total={} [{}] unlabeled={} missing={}",
            self.total,
            counts.join(" "),
            self.unlabeled,
            self.missing.len()
        )
    }
}

pub fn summarize(samples: &[SampleRef], classes: &ClassMap) -> DatasetSummary {
    let mut summary = DatasetSummary {
        total: samples.len(),
        ..Default::default()
    };
    for name in classes.names() {
        summary.per_class.insert(name.clone(), 0);
    }
    for sample in samples {
        if !sample.path.is_file() {
            summary.missing.push(sample.file.clone());
        }
        match sample.class.and_then(|c| classes.decode(c).ok()) {
            Some(name) => *summary.per_class.entry(name.to_string()).or_default() += 1,
            None => summary.unlabeled += 1,
        }
    }
    summary
}

/// Summarize and fail on the first missing image.
pub fn preflight(samples: &[SampleRef], classes: &ClassMap) -> DatasetResult<DatasetSummary> {
    let summary = summarize(samples, classes);
    summary.ensure_complete()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn counts_classes_and_flags_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.png"), b"x").unwrap();
        fs::write(tmp.path().join("b.png"), b"x").unwrap();
        let samples = vec![
            SampleRef {
                file: "a.png".into(),
                path: tmp.path().join("a.png"),
                class: Some(0),
            },
            SampleRef {
                file: "b.png".into(),
                path: tmp.path().join("b.png"),
                class: Some(0),
            },
            SampleRef {
                file: "gone.png".into(),
                path: tmp.path().join("gone.png"),
                class: Some(2),
            },
        ];
        let classes = ClassMap::default();
        let summary = summarize(&samples, &classes);
        assert_eq!(summary.per_class["vehicle"], 2);
        assert_eq!(summary.per_class["person"], 0);
        assert_eq!(summary.per_class["others"], 1);
        assert_eq!(summary.missing, vec!["gone.png".to_string()]);
        assert!(summary
            .describe(&classes)
            .contains("vehicle=2 person=0 others=1"));

        match preflight(&samples, &classes).unwrap_err() {
            DatasetError::MissingImages { first, missing, .. } => {
                assert_eq!(first, "gone.png");
                assert_eq!(missing, 1);
            }
            other => panic!("unexpected {other}"),
        }
        assert!(preflight(&samples[..2], &classes).is_ok());
    }
}
