use crate::error::Result;
use crate::layers::softmax::softmax_row;
use crate::loss::check_targets;
use crate::math::matrix::Matrix;

/// Categorical cross-entropy on raw logits.
///
/// The softmax is applied here, via a stable log-sum-exp, so the model must
/// NOT end in a `Softmax` layer. Pairing it with one normalizes twice.
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// Mean over the batch of `logsumexp(z) − z_y`.
    pub fn loss(logits: &Matrix, labels: &[usize]) -> Result<f64> {
        check_targets(logits, labels)?;
        let total: f64 = logits.data.iter().zip(labels.iter())
            .map(|(z, &y)| {
                let max = z.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let lse = max + z.iter().map(|&v| (v - max).exp()).sum::<f64>().ln();
                lse - z[y]
            })
            .sum();
        Ok(total / labels.len() as f64)
    }

    /// Gradient w.r.t. the logits: `(softmax(z) − onehot(y)) / batch`.
    pub fn gradient(logits: &Matrix, labels: &[usize]) -> Result<Matrix> {
        check_targets(logits, labels)?;
        let inv_batch = 1.0 / labels.len() as f64;
        let data = logits.data.iter().zip(labels.iter())
            .map(|(z, &y)| {
                let mut p = softmax_row(z);
                p[y] -= 1.0;
                p.into_iter().map(|v| v * inv_batch).collect()
            })
            .collect();
        Ok(Matrix { rows: logits.rows, cols: logits.cols, data })
    }
}
