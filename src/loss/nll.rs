use crate::error::Result;
use crate::loss::check_targets;
use crate::math::matrix::Matrix;

/// Small epsilon added inside log() to prevent log(0) = -inf.
const EPS: f64 = 1e-12;

/// Negative log-likelihood on probabilities, for models ending in `Softmax`.
pub struct NllLoss;

impl NllLoss {
    /// Mean over the batch of `−ln(p_y + ε)`.
    pub fn loss(probs: &Matrix, labels: &[usize]) -> Result<f64> {
        check_targets(probs, labels)?;
        let total: f64 = probs.data.iter().zip(labels.iter())
            .map(|(p, &y)| -(p[y] + EPS).ln())
            .sum();
        Ok(total / labels.len() as f64)
    }

    /// Gradient w.r.t. the probabilities: `−1 / (p_y + ε) / batch` at the
    /// label, zero elsewhere. The softmax layer's backward finishes the chain.
    pub fn gradient(probs: &Matrix, labels: &[usize]) -> Result<Matrix> {
        check_targets(probs, labels)?;
        let inv_batch = 1.0 / labels.len() as f64;
        let mut grad = Matrix::zeros(probs.rows, probs.cols);
        for ((g, p), &y) in grad.data.iter_mut().zip(probs.data.iter()).zip(labels.iter()) {
            g[y] = -inv_batch / (p[y] + EPS);
        }
        Ok(grad)
    }
}
