use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::layers::param::{Param, ParamRole};
use crate::layers::{expect_param, expect_width, missing_cache};
use crate::math::matrix::Matrix;

/// Per-channel batch normalization over channel-major `(C, H, W)` rows.
///
/// Training passes normalize with the statistics of the current batch
/// (over every sample and spatial position of a channel) and fold them into
/// exponential running averages. Inference uses the running averages only,
/// so a prediction never depends on the rest of its batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNorm2d {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub eps: f64,
    /// Weight of the newest batch in the running averages.
    pub momentum: f64,
    pub gamma: Param,
    pub beta: Param,
    pub running_mean: Vec<f64>,
    pub running_var: Vec<f64>,
    #[serde(skip)]
    cache: Option<NormCache>,
}

#[derive(Debug, Clone)]
struct NormCache {
    x_hat: Matrix,
    inv_std: Vec<f64>,
}

impl BatchNorm2d {
    pub const EPS: f64 = 1e-5;
    pub const MOMENTUM: f64 = 0.1;

    pub fn new(channels: usize, height: usize, width: usize) -> Result<BatchNorm2d> {
        let mut ones = Matrix::zeros(1, channels);
        ones.fill(1.0);
        let bn = BatchNorm2d {
            channels,
            height,
            width,
            eps: Self::EPS,
            momentum: Self::MOMENTUM,
            gamma: Param::new(ParamRole::NormScale, 1, ones),
            beta: Param::zeros(ParamRole::Bias, 1, 1, channels),
            running_mean: vec![0.0; channels],
            running_var: vec![1.0; channels],
            cache: None,
        };
        bn.validate()?;
        Ok(bn)
    }

    /// Checks geometry and that every per-channel tensor has `channels`
    /// entries.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.height == 0 || self.width == 0 {
            return Err(TrainError::Config(format!(
                "batch norm needs a non-empty input, got {}x{}x{}",
                self.channels, self.height, self.width
            )));
        }
        if self.eps.is_nan() || self.eps <= 0.0 || !(0.0..=1.0).contains(&self.momentum) {
            return Err(TrainError::Config(format!(
                "batch norm eps must be > 0 and momentum in [0, 1], got {} and {}",
                self.eps, self.momentum
            )));
        }
        expect_param("batch norm gamma", &self.gamma, 1, self.channels)?;
        expect_param("batch norm beta", &self.beta, 1, self.channels)?;
        for (name, len) in [("running_mean", self.running_mean.len()), ("running_var", self.running_var.len())] {
            if len != self.channels {
                return Err(TrainError::shape(format!("batch norm {name}"), self.channels, len));
            }
        }
        Ok(())
    }

    fn plane(&self) -> usize {
        self.height * self.width
    }

    pub fn input_len(&self) -> usize {
        self.channels * self.plane()
    }

    /// Column range of channel `c` within a row.
    fn span(&self, c: usize) -> Range<usize> {
        c * self.plane()..(c + 1) * self.plane()
    }

    fn affine(&self, input: &Matrix, mean: &[f64], inv_std: &[f64]) -> (Matrix, Matrix) {
        let mut x_hat = Matrix::zeros(input.rows, input.cols);
        let mut out = Matrix::zeros(input.rows, input.cols);
        for ((x, xh), y) in input.data.iter().zip(x_hat.data.iter_mut()).zip(out.data.iter_mut()) {
            for c in 0..self.channels {
                let (g, b) = (self.gamma.value.data[0][c], self.beta.value.data[0][c]);
                for i in self.span(c) {
                    xh[i] = (x[i] - mean[c]) * inv_std[c];
                    y[i] = g * xh[i] + b;
                }
            }
        }
        (x_hat, out)
    }

    /// Normalizes with the running statistics.
    pub fn forward(&self, input: &Matrix) -> Result<Matrix> {
        expect_width("batch norm input", self.input_len(), input)?;
        let inv_std: Vec<f64> = self.running_var.iter().map(|v| 1.0 / (v + self.eps).sqrt()).collect();
        Ok(self.affine(input, &self.running_mean, &inv_std).1)
    }

    /// Normalizes with batch statistics (biased variance) and updates the
    /// running averages (unbiased variance).
    pub fn forward_train(&mut self, input: &Matrix) -> Result<Matrix> {
        expect_width("batch norm input", self.input_len(), input)?;
        if input.rows == 0 {
            return Err(TrainError::shape("batch norm batch", "at least one sample", 0));
        }
        let count = (input.rows * self.plane()) as f64;
        let mut mean = vec![0.0; self.channels];
        let mut var = vec![0.0; self.channels];
        for c in 0..self.channels {
            let sum: f64 = input.data.iter().map(|x| x[self.span(c)].iter().sum::<f64>()).sum();
            mean[c] = sum / count;
            let sq: f64 = input.data.iter()
                .map(|x| x[self.span(c)].iter().map(|v| (v - mean[c]).powi(2)).sum::<f64>())
                .sum();
            var[c] = sq / count;

            let unbiased = if count > 1.0 { sq / (count - 1.0) } else { var[c] };
            let m = self.momentum;
            self.running_mean[c] = (1.0 - m) * self.running_mean[c] + m * mean[c];
            self.running_var[c] = (1.0 - m) * self.running_var[c] + m * unbiased;
        }

        let inv_std: Vec<f64> = var.iter().map(|v| 1.0 / (v + self.eps).sqrt()).collect();
        let (x_hat, out) = self.affine(input, &mean, &inv_std);
        self.cache = Some(NormCache { x_hat, inv_std });
        Ok(out)
    }

    /// `∂L/∂x = γ·σ⁻¹/m · (m·g − Σg − x̂·Σ(g·x̂))` per channel, with `m` the
    /// number of values the channel statistics were taken over.
    pub fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let NormCache { x_hat, inv_std } = self.cache.take().ok_or_else(|| missing_cache("batch norm"))?;
        if grad_output.shape() != x_hat.shape() {
            return Err(TrainError::shape(
                "batch norm gradient",
                format!("{:?}", x_hat.shape()),
                format!("{:?}", grad_output.shape()),
            ));
        }
        let m = (grad_output.rows * self.plane()) as f64;
        let mut grad_input = Matrix::zeros(grad_output.rows, grad_output.cols);
        let mut d_gamma = vec![0.0; self.channels];
        let mut d_beta = vec![0.0; self.channels];

        for c in 0..self.channels {
            for (g, xh) in grad_output.data.iter().zip(x_hat.data.iter()) {
                for i in self.span(c) {
                    d_beta[c] += g[i];
                    d_gamma[c] += g[i] * xh[i];
                }
            }
            let scale = self.gamma.value.data[0][c] * inv_std[c] / m;
            for ((g, xh), dx) in grad_output.data.iter().zip(x_hat.data.iter()).zip(grad_input.data.iter_mut()) {
                for i in self.span(c) {
                    dx[i] = scale * (m * g[i] - d_beta[c] - xh[i] * d_gamma[c]);
                }
            }
        }

        let as_row = |v: Vec<f64>| Matrix { rows: 1, cols: v.len(), data: vec![v] };
        self.gamma.grad_mut().add_scaled(&as_row(d_gamma), 1.0)?;
        self.beta.grad_mut().add_scaled(&as_row(d_beta), 1.0)?;
        Ok(grad_input)
    }

    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.gamma, &mut self.beta]
    }

    pub fn params(&self) -> Vec<&Param> {
        vec![&self.gamma, &self.beta]
    }
}
