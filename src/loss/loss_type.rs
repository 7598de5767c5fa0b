use serde::{Serialize, Deserialize};

use crate::error::Result;
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::loss::mse::MseLoss;
use crate::loss::nll::NllLoss;
use crate::loss::Criterion;
use crate::math::matrix::Matrix;

/// What a model's output row means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    /// Unnormalized scores.
    Logits,
    /// Rows already sum to one (model ends in `Softmax`).
    Probabilities,
}

/// Selects which loss function the training loop uses.
///
/// - `CrossEntropy` — categorical cross-entropy on logits; softmax is applied
///   inside the loss. Pair with a model that has no softmax head.
/// - `Nll`          — negative log-likelihood on probabilities; pair with a
///   model whose last layer is `Softmax`.
/// - `Mse`          — squared error against one-hot targets; any head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    CrossEntropy,
    Nll,
    Mse,
}

impl LossType {
    /// Score kind the loss requires, or `None` if it accepts either.
    pub fn expects(&self) -> Option<ScoreKind> {
        match self {
            LossType::CrossEntropy => Some(ScoreKind::Logits),
            LossType::Nll => Some(ScoreKind::Probabilities),
            LossType::Mse => None,
        }
    }
}

impl Criterion for LossType {
    fn expects(&self) -> Option<ScoreKind> {
        LossType::expects(self)
    }

    fn loss(&self, scores: &Matrix, labels: &[usize]) -> Result<f64> {
        match self {
            LossType::CrossEntropy => CrossEntropyLoss::loss(scores, labels),
            LossType::Nll => NllLoss::loss(scores, labels),
            LossType::Mse => MseLoss::loss(scores, labels),
        }
    }

    fn loss_and_grad(&self, scores: &Matrix, labels: &[usize]) -> Result<(f64, Matrix)> {
        let (loss, grad) = match self {
            LossType::CrossEntropy => (
                CrossEntropyLoss::loss(scores, labels)?,
                CrossEntropyLoss::gradient(scores, labels)?,
            ),
            LossType::Nll => (NllLoss::loss(scores, labels)?, NllLoss::gradient(scores, labels)?),
            LossType::Mse => (MseLoss::loss(scores, labels)?, MseLoss::gradient(scores, labels)?),
        };
        Ok((loss, grad))
    }
}
