use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::param::{Param, ParamRole};
use crate::layers::{expect_param, expect_width, missing_cache};
use crate::math::matrix::Matrix;

/// Fully connected layer: `y = x·W + b`, with `W` shaped `input_size × size`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    pub input_size: usize,
    pub size: usize,
    pub weights: Param,
    pub biases: Param,
    /// Input of the last training forward pass, needed for `∂L/∂W`.
    #[serde(skip)]
    input_cache: Option<Matrix>,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(input_size: usize, size: usize, rng: &mut R) -> Dense {
        let weights = Param::new(
            ParamRole::DenseWeight,
            input_size,
            Matrix::xavier(input_size, size, input_size, size, rng),
        );
        let biases = Param::zeros(ParamRole::Bias, input_size, 1, size);
        Dense { input_size, size, weights, biases, input_cache: None }
    }

    pub fn validate(&self) -> Result<()> {
        expect_param("dense weights", &self.weights, self.input_size, self.size)?;
        expect_param("dense biases", &self.biases, 1, self.size)
    }

    pub fn forward(&self, input: &Matrix) -> Result<Matrix> {
        expect_width("dense input", self.input_size, input)?;
        input.matmul(&self.weights.value)?.add_row(&self.biases.value)
    }

    pub fn forward_train(&mut self, input: &Matrix) -> Result<Matrix> {
        let out = self.forward(input)?;
        self.input_cache = Some(input.clone());
        Ok(out)
    }

    /// Accumulates `∂L/∂W`, `∂L/∂b` and returns `∂L/∂x`.
    pub fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let input = self.input_cache.take().ok_or_else(|| missing_cache("dense"))?;
        expect_width("dense gradient", self.size, grad_output)?;

        let w_grad = input.transpose().matmul(grad_output)?;
        self.weights.grad_mut().add_scaled(&w_grad, 1.0)?;
        self.biases.grad_mut().add_scaled(&grad_output.column_sums(), 1.0)?;

        grad_output.matmul(&self.weights.value.transpose())
    }

    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weights, &mut self.biases]
    }

    pub fn params(&self) -> Vec<&Param> {
        vec![&self.weights, &self.biases]
    }
}
