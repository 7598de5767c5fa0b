pub mod mse;
pub mod nll;
pub mod cross_entropy;
pub mod loss_type;

pub use mse::MseLoss;
pub use nll::NllLoss;
pub use cross_entropy::CrossEntropyLoss;
pub use loss_type::{LossType, ScoreKind};

use crate::error::{Result, TrainError};
use crate::math::matrix::Matrix;

/// A differentiable classification loss over a batch of score rows and
/// integer class labels. Losses are batch means.
pub trait Criterion {
    /// Score kind this loss is defined on; `None` accepts both.
    fn expects(&self) -> Option<ScoreKind>;

    /// Loss only. Used by evaluation, which never builds gradients.
    fn loss(&self, scores: &Matrix, labels: &[usize]) -> Result<f64>;

    /// Loss and `∂L/∂scores`.
    fn loss_and_grad(&self, scores: &Matrix, labels: &[usize]) -> Result<(f64, Matrix)>;
}

/// One label per score row, each label a valid column.
pub(crate) fn check_targets(scores: &Matrix, labels: &[usize]) -> Result<()> {
    if scores.rows != labels.len() {
        return Err(TrainError::shape("scores vs labels", format!("{} rows", labels.len()), scores.rows));
    }
    if labels.is_empty() {
        return Err(TrainError::shape("loss batch", "at least one sample", 0));
    }
    if let Some(&bad) = labels.iter().find(|&&y| y >= scores.cols) {
        return Err(TrainError::LabelOutOfRange { label: bad, classes: scores.cols });
    }
    Ok(())
}
