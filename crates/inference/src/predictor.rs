use crate::submission::Submission;
use crate::{InferenceError, InferenceResult};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn_dataset::{BatchConfig, BatchIter, SampleRef, TransformPipeline};
use data_contracts::{ClassMap, SubmissionRecord};
use models::ImageClassifier;

/// Class probabilities for one test file.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub file: String,
    pub class: usize,
    pub probabilities: Vec<f32>,
}

/// Index of the largest value. Ties go to the lowest index; NaN never wins.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] || values[best].is_nan() {
            best = i;
        }
    }
    best
}

/// Softmax over the logits of every batch, in iterator order.
pub fn predict_batches<B: Backend, M: ImageClassifier<B>>(
    model: &M,
    batches: &mut BatchIter,
    device: &B::Device,
) -> InferenceResult<Vec<Prediction>> {
    batches.restart(0);
    let mut predictions = Vec::with_capacity(batches.len());
    while let Some(batch) = batches.next_batch::<B>(device)? {
        let probs = softmax(model.logits(batch.images), 1);
        let num_classes = probs.dims()[1];
        let values = probs
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| InferenceError::Tensor(format!("{e:?}")))?;
        for (file, row) in batch.files.into_iter().zip(values.chunks(num_classes)) {
            predictions.push(Prediction {
                file,
                class: argmax(row),
                probabilities: row.to_vec(),
            });
        }
    }
    Ok(predictions)
}

/// Predict every sample (in order, no augmentation) and decode to a submission.
///
/// Nothing is returned unless the whole set was predicted.
pub fn predict_test_set<B: Backend, M: ImageClassifier<B>>(
    model: &M,
    samples: Vec<SampleRef>,
    classes: &ClassMap,
    pipeline: TransformPipeline,
    batch_size: usize,
    id_column: &str,
    device: &B::Device,
) -> InferenceResult<Submission> {
    let mut batches = BatchIter::new(
        samples,
        classes.clone(),
        BatchConfig::eval(batch_size, pipeline),
    )?;
    let predictions = predict_batches(model, &mut batches, device)?;
    decode_predictions(&predictions, classes, id_column)
}

pub fn decode_predictions(
    predictions: &[Prediction],
    classes: &ClassMap,
    id_column: &str,
) -> InferenceResult<Submission> {
    let mut records = Vec::with_capacity(predictions.len());
    for p in predictions {
        if p.probabilities.len() != classes.len() {
            return Err(InferenceError::ClassCount {
                expected: classes.len(),
                actual: p.probabilities.len(),
            });
        }
        records.push(SubmissionRecord {
            file: p.file.clone(),
            label: classes.decode(p.class)?.to_string(),
        });
    }
    Ok(Submission {
        id_column: id_column.to_string(),
        records,
    })
}
