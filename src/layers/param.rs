use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::math::matrix::Matrix;

/// What a parameter tensor is for. Initializers select parameters by role
/// rather than by inspecting layer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamRole {
    ConvWeight,
    DenseWeight,
    /// Per-channel gain of a normalization layer.
    NormScale,
    Bias,
}

impl ParamRole {
    pub fn is_convolution_weight(&self) -> bool {
        matches!(self, ParamRole::ConvWeight)
    }
}

/// A trainable tensor plus its accumulated gradient.
///
/// The gradient is not serialized; after loading it is rebuilt lazily by
/// `zero_grad` / `grad_mut`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub role: ParamRole,
    /// Number of inputs feeding each output unit.
    pub fan_in: usize,
    /// Number of output units each input feeds.
    #[serde(default)]
    pub fan_out: usize,
    pub value: Matrix,
    #[serde(skip)]
    grad: Matrix,
}

impl Param {
    /// `fan_out` defaults to the column count, which is right for an
    /// `inputs × outputs` weight.
    pub fn new(role: ParamRole, fan_in: usize, value: Matrix) -> Param {
        let grad = Matrix::zeros(value.rows, value.cols);
        Param { role, fan_in, fan_out: value.cols, value, grad }
    }

    pub fn with_fan_out(mut self, fan_out: usize) -> Param {
        self.fan_out = fan_out;
        self
    }

    pub fn zeros(role: ParamRole, fan_in: usize, rows: usize, cols: usize) -> Param {
        Param::new(role, fan_in, Matrix::zeros(rows, cols))
    }

    pub fn grad(&self) -> &Matrix {
        &self.grad
    }

    pub fn grad_mut(&mut self) -> &mut Matrix {
        if self.grad.shape() != self.value.shape() {
            self.grad = Matrix::zeros(self.value.rows, self.value.cols);
        }
        &mut self.grad
    }

    pub fn zero_grad(&mut self) {
        if self.grad.shape() == self.value.shape() {
            self.grad.fill(0.0);
        } else {
            self.grad = Matrix::zeros(self.value.rows, self.value.cols);
        }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Weight initialization schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    HeNormal,
    XavierNormal,
    Zeros,
}

impl Initializer {
    pub fn apply<R: Rng + ?Sized>(&self, param: &mut Param, rng: &mut R) {
        let (rows, cols) = param.value.shape();
        param.value = match self {
            Initializer::HeNormal => Matrix::he(rows, cols, param.fan_in, rng),
            Initializer::XavierNormal => Matrix::xavier(rows, cols, param.fan_in, param.fan_out, rng),
            Initializer::Zeros => Matrix::zeros(rows, cols),
        };
        param.zero_grad();
    }
}
