pub mod param;
pub mod dense;
pub mod conv;
pub mod pool;
pub mod batch_norm;
pub mod softmax;
pub mod layer;

pub use param::{Initializer, Param, ParamRole};
pub use dense::Dense;
pub use conv::{Conv2d, Conv2dShape};
pub use pool::{GlobalAvgPool, MaxPool2d};
pub use batch_norm::BatchNorm2d;
pub use softmax::Softmax;
pub use layer::{ActivationLayer, Layer};

use crate::error::{Result, TrainError};
use crate::math::matrix::Matrix;

pub(crate) fn expect_width(context: &str, expected: usize, m: &Matrix) -> Result<()> {
    if m.cols != expected {
        return Err(TrainError::shape(context, format!("{expected} columns"), m.cols));
    }
    Ok(())
}

/// Checks a deserialized parameter against the shape its layer implies.
pub(crate) fn expect_param(context: &str, param: &Param, rows: usize, cols: usize) -> Result<()> {
    let v = &param.value;
    let consistent = v.data.len() == v.rows && v.data.iter().all(|r| r.len() == v.cols);
    if v.shape() != (rows, cols) || !consistent {
        return Err(TrainError::shape(
            context,
            format!("{rows}x{cols}"),
            format!("{:?}", param.value.shape()),
        ));
    }
    Ok(())
}

pub(crate) fn missing_cache(layer: &str) -> TrainError {
    TrainError::Config(format!("{layer} backward called without a training forward pass"))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::math::matrix::Matrix;

    const H: f64 = 1e-5;
    const TOL: f64 = 1e-4;

    /// Fixed, non-uniform projection so `L = Σ f(x) ⊙ R` has a rich gradient.
    fn projection(rows: usize, cols: usize) -> Matrix {
        let data = (0..rows)
            .map(|i| (0..cols).map(|j| ((i * 7 + j * 3) % 5) as f64 * 0.3 - 0.6).collect())
            .collect();
        Matrix { rows, cols, data }
    }

    fn objective(y: &Matrix, r: &Matrix) -> f64 {
        y.data.iter().flatten().zip(r.data.iter().flatten()).map(|(a, b)| a * b).sum()
    }

    fn assert_close(analytic: &Matrix, numeric: &Matrix) {
        for (a, n) in analytic.data.iter().flatten().zip(numeric.data.iter().flatten()) {
            assert!(
                (a - n).abs() <= TOL * n.abs().max(1.0),
                "analytic {a} vs numeric {n}"
            );
        }
    }

    fn numeric_gradient<F: Fn(&Matrix) -> Matrix>(at: &Matrix, f: F, r: &Matrix) -> Matrix {
        let mut numeric = Matrix::zeros(at.rows, at.cols);
        for i in 0..at.rows {
            for j in 0..at.cols {
                let mut plus = at.clone();
                plus.data[i][j] += H;
                let mut minus = at.clone();
                minus.data[i][j] -= H;
                numeric.data[i][j] = (objective(&f(&plus), r) - objective(&f(&minus), r)) / (2.0 * H);
            }
        }
        numeric
    }

    pub fn check_input_gradient<F, B>(x: &Matrix, forward: F, backward: B)
    where
        F: Fn(&Matrix) -> Matrix,
        B: Fn(&Matrix, &Matrix) -> Matrix,
    {
        let y = forward(x);
        let r = projection(y.rows, y.cols);
        let analytic = backward(x, &r);
        assert_eq!(analytic.shape(), x.shape());
        assert_close(&analytic, &numeric_gradient(x, forward, &r));
    }

    pub fn check_param_gradient<F, G>(w: &Matrix, forward: F, grad: G)
    where
        F: Fn(&Matrix) -> Matrix,
        G: Fn(&Matrix) -> Matrix,
    {
        let y = forward(w);
        let r = projection(y.rows, y.cols);
        let analytic = grad(&r);
        assert_eq!(analytic.shape(), w.shape());
        assert_close(&analytic, &numeric_gradient(w, forward, &r));
    }
}
