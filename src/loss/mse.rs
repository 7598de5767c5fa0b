use crate::error::Result;
use crate::loss::check_targets;
use crate::math::matrix::Matrix;

/// Squared error against one-hot targets.
pub struct MseLoss;

fn one_hot(label: usize, j: usize) -> f64 {
    if label == j { 1.0 } else { 0.0 }
}

impl MseLoss {
    /// Mean over batch and classes of `(s − onehot(y))²`.
    pub fn loss(scores: &Matrix, labels: &[usize]) -> Result<f64> {
        check_targets(scores, labels)?;
        let total: f64 = scores.data.iter().zip(labels.iter())
            .map(|(s, &y)| {
                s.iter().enumerate().map(|(j, &v)| (v - one_hot(y, j)).powi(2)).sum::<f64>()
            })
            .sum();
        Ok(total / (labels.len() * scores.cols) as f64)
    }

    /// Per-output gradient: `2 (s − onehot(y)) / (batch · classes)`.
    pub fn gradient(scores: &Matrix, labels: &[usize]) -> Result<Matrix> {
        check_targets(scores, labels)?;
        let scale = 2.0 / (labels.len() * scores.cols) as f64;
        let data = scores.data.iter().zip(labels.iter())
            .map(|(s, &y)| {
                s.iter().enumerate().map(|(j, &v)| (v - one_hot(y, j)) * scale).collect()
            })
            .collect();
        Ok(Matrix { rows: scores.rows, cols: scores.cols, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn known_value() {
        let s = Matrix::from_rows(vec![vec![0.5, 0.5]]).unwrap();
        assert_relative_eq!(MseLoss::loss(&s, &[0]).unwrap(), 0.25);
        let g = MseLoss::gradient(&s, &[0]).unwrap();
        assert_relative_eq!(g.data[0][0], -0.5);
        assert_relative_eq!(g.data[0][1], 0.5);
    }
}
