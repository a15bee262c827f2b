use serde::{Deserialize, Serialize};

/// One manifest entry. Training rows carry a label, test rows do not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub file: String,
    pub label: Option<String>,
}

impl ManifestRow {
    pub fn labeled(file: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            label: Some(label.into()),
        }
    }

    pub fn unlabeled(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            label: None,
        }
    }
}

/// Predicted label for one test file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub file: String,
    pub label: String,
}
