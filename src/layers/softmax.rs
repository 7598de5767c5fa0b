use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::layers::missing_cache;
use crate::math::matrix::Matrix;

/// Row-wise softmax: turns each row of logits into a probability vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Softmax {
    #[serde(skip)]
    output_cache: Option<Matrix>,
}

/// Numerically stable softmax of one row (the row max is subtracted first).
pub fn softmax_row(row: &[f64]) -> Vec<f64> {
    let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = row.iter().map(|&x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

impl Softmax {
    pub fn new() -> Softmax {
        Softmax::default()
    }

    pub fn forward(&self, input: &Matrix) -> Result<Matrix> {
        Ok(Matrix {
            rows: input.rows,
            cols: input.cols,
            data: input.data.iter().map(|r| softmax_row(r)).collect(),
        })
    }

    pub fn forward_train(&mut self, input: &Matrix) -> Result<Matrix> {
        let out = self.forward(input)?;
        self.output_cache = Some(out.clone());
        Ok(out)
    }

    /// Full Jacobian-vector product: `∂L/∂z_i = p_i · (g_i − Σ_j g_j p_j)`.
    pub fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let probs = self.output_cache.take().ok_or_else(|| missing_cache("softmax"))?;
        if probs.shape() != grad_output.shape() {
            return Err(TrainError::shape(
                "softmax gradient",
                format!("{:?}", probs.shape()),
                format!("{:?}", grad_output.shape()),
            ));
        }
        let data = probs.data.iter().zip(grad_output.data.iter())
            .map(|(p, g)| {
                let dot: f64 = p.iter().zip(g.iter()).map(|(a, b)| a * b).sum();
                p.iter().zip(g.iter()).map(|(pi, gi)| pi * (gi - dot)).collect()
            })
            .collect();
        Ok(Matrix { rows: probs.rows, cols: probs.cols, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::test_support::check_input_gradient;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn rows_sum_to_one_even_for_large_logits() {
        let s = Softmax::new();
        let x = Matrix::from_rows(vec![vec![1000.0, 1001.0, 999.0], vec![0.0, 0.0, 0.0]]).unwrap();
        let y = s.forward(&x).unwrap();
        for row in &y.data {
            assert!(row.iter().all(|p| p.is_finite()));
            assert_relative_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
        assert_relative_eq!(y.data[1][0], 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(9);
        let s = Softmax::new();
        let x = Matrix::he(3, 4, 1, &mut rng);
        check_input_gradient(
            &x,
            |m| s.forward(m).unwrap(),
            |m, g| {
                let mut layer = Softmax::new();
                layer.forward_train(m).unwrap();
                layer.backward(g).unwrap()
            },
        );
    }
}
