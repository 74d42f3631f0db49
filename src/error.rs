use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    #[error("unknown dataset `{0}`")]
    UnknownDataset(String),
    #[error("unknown task type `{0}`")]
    UnknownTask(String),
    #[error("malformed line {line} in `{file}`")]
    MalformedLine { file: String, line: usize },
}

#[derive(Debug, Error, PartialEq)]
pub enum LossError {
    #[error("target contains no valid elements")]
    EmptyMask,
    #[error("target class {target} outside of [0, {classes})")]
    TargetOutOfRange { target: i64, classes: usize },
    #[error("task `{task}` expects {expected} targets")]
    TargetMismatch {
        task: &'static str,
        expected: &'static str,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum MetricError {
    #[error("mask contains no valid elements")]
    EmptyMask,
    #[error("confusion matrix has not been updated")]
    NotUpdated,
    #[error("prediction and target lengths differ: {pred} vs {target}")]
    LengthMismatch { pred: usize, target: usize },
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("prediction {0} outside of the class range")]
    PredictionOutOfRange(i64),
}
