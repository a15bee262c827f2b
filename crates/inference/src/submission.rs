use crate::{InferenceError, InferenceResult};
use burn_dataset::manifest::LABEL_COLUMN;
use data_contracts::SubmissionRecord;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SUBMISSION: &str = "submission.csv";

/// Predicted labels keyed by the test manifest's identifier column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id_column: String,
    pub records: Vec<SubmissionRecord>,
}

impl Submission {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write `[id_column, label]` rows through a sibling temp file and rename it
    /// over `path`, so a failed write never leaves a truncated table behind.
    pub fn write_csv(&self, path: &Path) -> InferenceResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| InferenceError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp = temp_sibling(path);
        if let Err(e) = self.write_rows(&tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, path).map_err(|source| InferenceError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_rows(&self, path: &Path) -> InferenceResult<()> {
        let csv_err = |source| InferenceError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
        writer
            .write_record([self.id_column.as_str(), LABEL_COLUMN])
            .map_err(csv_err)?;
        for record in &self.records {
            writer
                .write_record([record.file.as_str(), record.label.as_str()])
                .map_err(csv_err)?;
        }
        writer.flush().map_err(|source| InferenceError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_SUBMISSION.to_string());
    path.with_file_name(format!(".{name}.tmp"))
}
