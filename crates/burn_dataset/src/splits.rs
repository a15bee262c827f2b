//! Seeded train/validation partitioning.

use crate::types::{DatasetError, DatasetResult};
use rand::{seq::SliceRandom, SeedableRng};

/// Fewest samples that leave at least one on each side of the split.
pub const MIN_SPLIT_SAMPLES: usize = 2;

/// Disjoint index partitions into the original sample order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick the items of each partition out of `items`.
    pub fn apply<T: Clone>(&self, items: &[T]) -> (Vec<T>, Vec<T>) {
        let pick = |idx: &[usize]| idx.iter().map(|&i| items[i].clone()).collect();
        (pick(&self.train), pick(&self.val))
    }
}

/// Validation size: `ceil(n * ratio)`.
pub fn validation_count(n: usize, val_ratio: f64) -> usize {
    // Guard against 0.1 * 100 landing a hair above 10.
    ((n as f64 * val_ratio) - 1e-9).ceil().max(0.0) as usize
}

/// Shuffle `0..n` with `seed`; the first `validation_count` indices form the
/// validation partition.
pub fn split_indices(n: usize, val_ratio: f64, seed: u64) -> DatasetResult<Split> {
    if !(val_ratio > 0.0 && val_ratio < 1.0) {
        return Err(DatasetError::InvalidConfig(format!(
            "validation ratio must be in (0, 1), got {val_ratio}"
        )));
    }
    if n < MIN_SPLIT_SAMPLES {
        return Err(DatasetError::InsufficientData {
            available: n,
            required: MIN_SPLIT_SAMPLES,
        });
    }
    let n_val = validation_count(n, val_ratio);
    if n_val == 0 || n_val >= n {
        return Err(DatasetError::InsufficientData {
            available: n,
            required: MIN_SPLIT_SAMPLES,
        });
    }
    let mut perm: Vec<usize> = (0..n).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    perm.shuffle(&mut rng);
    let train = perm.split_off(n_val);
    Ok(Split { train, val: perm })
}

/// Split parallel sample/label collections the same way.
pub fn split_parallel<T: Clone, L: Clone>(
    samples: &[T],
    labels: &[L],
    val_ratio: f64,
    seed: u64,
) -> DatasetResult<((Vec<T>, Vec<T>), (Vec<L>, Vec<L>))> {
    if samples.len() != labels.len() {
        return Err(DatasetError::ShapeMismatch {
            what: "samples vs labels".to_string(),
            expected: samples.len().to_string(),
            actual: labels.len().to_string(),
        });
    }
    let split = split_indices(samples.len(), val_ratio, seed)?;
    Ok((split.apply(samples), split.apply(labels)))
}
