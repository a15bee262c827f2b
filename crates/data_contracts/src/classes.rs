use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Class ordering used by every run unless a run card says otherwise.
pub const DEFAULT_CLASSES: [&str; 3] = ["vehicle", "person", "others"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("unknown label {0:?}")]
    UnknownLabel(String),
    #[error("class index {index} out of range for {num_classes} classes")]
    IndexOutOfRange { index: usize, num_classes: usize },
    #[error("class set is empty")]
    EmptyClassSet,
    #[error("class {0:?} listed more than once")]
    DuplicateClass(String),
    #[error("class name at position {0} is blank")]
    BlankClass(usize),
}

/// Bijection between class names and contiguous indices `0..len`.
///
/// Built once per run and passed by reference to whatever needs to encode or
/// decode labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ClassMap {
    names: Vec<String>,
}

impl ClassMap {
    pub fn new<I, S>(names: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(LabelError::EmptyClassSet);
        }
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(LabelError::BlankClass(i));
            }
            if names[..i].contains(name) {
                return Err(LabelError::DuplicateClass(name.clone()));
            }
        }
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn encode(&self, label: &str) -> Result<usize, LabelError> {
        self.names
            .iter()
            .position(|n| n == label)
            .ok_or_else(|| LabelError::UnknownLabel(label.to_string()))
    }

    pub fn decode(&self, index: usize) -> Result<&str, LabelError> {
        self.names
            .get(index)
            .map(String::as_str)
            .ok_or(LabelError::IndexOutOfRange {
                index,
                num_classes: self.names.len(),
            })
    }

    pub fn one_hot(&self, index: usize) -> Result<Vec<f32>, LabelError> {
        if index >= self.names.len() {
            return Err(LabelError::IndexOutOfRange {
                index,
                num_classes: self.names.len(),
            });
        }
        let mut v = vec![0.0f32; self.names.len()];
        v[index] = 1.0;
        Ok(v)
    }

    /// Encode straight to a one-hot vector.
    pub fn encode_one_hot(&self, label: &str) -> Result<Vec<f32>, LabelError> {
        self.one_hot(self.encode(label)?)
    }
}

impl Default for ClassMap {
    fn default() -> Self {
        Self {
            names: DEFAULT_CLASSES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for ClassMap {
    type Error = LabelError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        ClassMap::new(names)
    }
}

impl From<ClassMap> for Vec<String> {
    fn from(map: ClassMap) -> Self {
        map.names
    }
}
