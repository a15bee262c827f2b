//! Reading train/test manifests and resolving rows to image paths.

use crate::types::{DatasetError, DatasetResult, SampleRef};
use data_contracts::{ClassMap, ManifestRow};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_TRAIN_MANIFEST: &str = "train_files.csv";
pub const DEFAULT_TEST_MANIFEST: &str = "test_files.csv";
pub const LABEL_COLUMN: &str = "label";
/// Used when the identifier column header is blank.
pub const DEFAULT_ID_COLUMN: &str = "file";

/// Parsed manifest. The first CSV column is the row key.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub path: PathBuf,
    pub id_column: String,
    pub rows: Vec<ManifestRow>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Resolve rows against `image_dir`, encoding labels through `classes` when given.
    pub fn resolve(
        &self,
        image_dir: &Path,
        classes: Option<&ClassMap>,
    ) -> DatasetResult<Vec<SampleRef>> {
        self.rows
            .iter()
            .map(|row| {
                let class = match (classes, row.label.as_deref()) {
                    (Some(map), Some(label)) => {
                        Some(map.encode(label).map_err(|source| DatasetError::Label {
                            file: row.file.clone(),
                            source,
                        })?)
                    }
                    _ => None,
                };
                Ok(SampleRef {
                    file: row.file.clone(),
                    path: image_dir.join(&row.file),
                    class,
                })
            })
            .collect()
    }
}

fn malformed(path: &Path, msg: impl Into<String>) -> DatasetError {
    DatasetError::MalformedManifest {
        path: path.to_path_buf(),
        msg: msg.into(),
    }
}

/// Read a manifest. With `require_label`, a `label` column must exist and be non-empty.
pub fn load_manifest(path: &Path, require_label: bool) -> DatasetResult<Manifest> {
    if !path.is_file() {
        return Err(DatasetError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| malformed(path, e.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|e| malformed(path, format!("unreadable header: {e}")))?
        .clone();
    if headers.is_empty() {
        return Err(malformed(path, "missing header row"));
    }
    let id_column = match headers.get(0).map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => DEFAULT_ID_COLUMN.to_string(),
    };
    let label_idx = headers
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, h)| *h == LABEL_COLUMN)
        .map(|(i, _)| i);
    if require_label && label_idx.is_none() {
        return Err(malformed(
            path,
            format!("missing `{LABEL_COLUMN}` column (header: {:?})", headers),
        ));
    }

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        // Header is line 1.
        let line = i + 2;
        let record = record.map_err(|e| malformed(path, format!("line {line}: {e}")))?;
        let file = record.get(0).unwrap_or_default().to_string();
        if file.is_empty() {
            return Err(malformed(path, format!("line {line}: empty file identifier")));
        }
        if !seen.insert(file.clone()) {
            return Err(malformed(
                path,
                format!("line {line}: duplicate file identifier {file:?}"),
            ));
        }
        let row = if require_label {
            let label = label_idx
                .and_then(|j| record.get(j))
                .unwrap_or_default()
                .to_string();
            if label.is_empty() {
                return Err(malformed(path, format!("line {line}: empty label for {file:?}")));
            }
            ManifestRow::labeled(file, label)
        } else {
            ManifestRow::unlabeled(file)
        };
        rows.push(row);
    }

    Ok(Manifest {
        path: path.to_path_buf(),
        id_column,
        rows,
    })
}

/// Directory layout of a dataset root.
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    pub root: PathBuf,
    pub train_manifest: String,
    pub test_manifest: String,
    pub train_dir: String,
    pub test_dir: String,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            train_manifest: DEFAULT_TRAIN_MANIFEST.to_string(),
            test_manifest: DEFAULT_TEST_MANIFEST.to_string(),
            train_dir: "train".to_string(),
            test_dir: "test".to_string(),
        }
    }

    pub fn train_manifest_path(&self) -> PathBuf {
        self.root.join(&self.train_manifest)
    }

    pub fn test_manifest_path(&self) -> PathBuf {
        self.root.join(&self.test_manifest)
    }

    pub fn train_image_dir(&self) -> PathBuf {
        self.root.join(&self.train_dir)
    }

    pub fn test_image_dir(&self) -> PathBuf {
        self.root.join(&self.test_dir)
    }

    pub fn load_train(&self) -> DatasetResult<Manifest> {
        load_manifest(&self.train_manifest_path(), true)
    }

    pub fn load_test(&self) -> DatasetResult<Manifest> {
        load_manifest(&self.test_manifest_path(), false)
    }

    /// Load both manifests; both must be present before anything else runs.
    pub fn load_indexes(&self) -> DatasetResult<(Manifest, Manifest)> {
        Ok((self.load_train()?, self.load_test()?))
    }
}
