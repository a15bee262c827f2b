//! Shared data contracts for the triclass workspace: the class map, manifest rows
//! and submission records.

pub mod classes;
pub mod manifest;

pub use classes::{ClassMap, LabelError, DEFAULT_CLASSES};
pub use manifest::{ManifestRow, SubmissionRecord};
