use serde::{Deserialize, Serialize};

use crate::activation::activation::ActivationFunction;
use crate::error::Result;
use crate::layers::batch_norm::BatchNorm2d;
use crate::layers::conv::Conv2d;
use crate::layers::dense::Dense;
use crate::layers::missing_cache;
use crate::layers::param::Param;
use crate::layers::pool::{GlobalAvgPool, MaxPool2d};
use crate::layers::softmax::Softmax;
use crate::math::matrix::Matrix;

/// Element-wise activation applied as its own layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationLayer {
    pub function: ActivationFunction,
    #[serde(skip)]
    pre_activation: Option<Matrix>,
}

impl ActivationLayer {
    pub fn new(function: ActivationFunction) -> ActivationLayer {
        ActivationLayer { function, pre_activation: None }
    }

    pub fn forward(&self, input: &Matrix) -> Matrix {
        input.map(|x| self.function.function(x))
    }

    pub fn forward_train(&mut self, input: &Matrix) -> Matrix {
        let out = self.forward(input);
        self.pre_activation = Some(input.clone());
        out
    }

    /// `∂L/∂z = ∂L/∂a ⊙ σ'(z)`.
    pub fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let z = self.pre_activation.take().ok_or_else(|| missing_cache("activation"))?;
        grad_output.zip_map(&z, |g, z| g * self.function.derivative(z))
    }
}

/// One stage of a sequential network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    Dense(Dense),
    Conv2d(Conv2d),
    BatchNorm2d(BatchNorm2d),
    MaxPool2d(MaxPool2d),
    GlobalAvgPool(GlobalAvgPool),
    Activation(ActivationLayer),
    Softmax(Softmax),
}

impl Layer {
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Dense(_) => "dense",
            Layer::Conv2d(_) => "conv2d",
            Layer::BatchNorm2d(_) => "batch_norm2d",
            Layer::MaxPool2d(_) => "max_pool2d",
            Layer::GlobalAvgPool(_) => "global_avg_pool",
            Layer::Activation(_) => "activation",
            Layer::Softmax(_) => "softmax",
        }
    }

    /// Checks the layer's own geometry and parameter shapes.
    pub fn validate(&self) -> Result<()> {
        match self {
            Layer::Dense(l) => l.validate(),
            Layer::Conv2d(l) => l.validate(),
            Layer::BatchNorm2d(l) => l.validate(),
            Layer::MaxPool2d(l) => l.validate(),
            Layer::GlobalAvgPool(l) => l.validate(),
            Layer::Activation(_) | Layer::Softmax(_) => Ok(()),
        }
    }

    /// Input width the layer requires; `None` for width-agnostic layers.
    pub fn input_len(&self) -> Option<usize> {
        match self {
            Layer::Dense(l) => Some(l.input_size),
            Layer::Conv2d(l) => Some(l.shape.input_len()),
            Layer::BatchNorm2d(l) => Some(l.input_len()),
            Layer::MaxPool2d(l) => Some(l.input_len()),
            Layer::GlobalAvgPool(l) => Some(l.input_len()),
            Layer::Activation(_) | Layer::Softmax(_) => None,
        }
    }

    /// Output width given an input of width `input_len`.
    pub fn output_len(&self, input_len: usize) -> usize {
        match self {
            Layer::Dense(l) => l.size,
            Layer::Conv2d(l) => l.shape.output_len(),
            Layer::MaxPool2d(l) => l.output_len(),
            Layer::GlobalAvgPool(l) => l.channels,
            Layer::BatchNorm2d(l) => l.input_len(),
            Layer::Activation(_) | Layer::Softmax(_) => input_len,
        }
    }

    /// Inference pass. Leaves every cache untouched.
    pub fn forward(&self, input: &Matrix) -> Result<Matrix> {
        match self {
            Layer::Dense(l) => l.forward(input),
            Layer::Conv2d(l) => l.forward(input),
            Layer::BatchNorm2d(l) => l.forward(input),
            Layer::MaxPool2d(l) => l.forward(input),
            Layer::GlobalAvgPool(l) => l.forward(input),
            Layer::Activation(l) => Ok(l.forward(input)),
            Layer::Softmax(l) => l.forward(input),
        }
    }

    /// Training pass. Stores whatever `backward` needs.
    pub fn forward_train(&mut self, input: &Matrix) -> Result<Matrix> {
        match self {
            Layer::Dense(l) => l.forward_train(input),
            Layer::Conv2d(l) => l.forward_train(input),
            Layer::BatchNorm2d(l) => l.forward_train(input),
            Layer::MaxPool2d(l) => l.forward_train(input),
            Layer::GlobalAvgPool(l) => l.forward(input),
            Layer::Activation(l) => Ok(l.forward_train(input)),
            Layer::Softmax(l) => l.forward_train(input),
        }
    }

    pub fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        match self {
            Layer::Dense(l) => l.backward(grad_output),
            Layer::Conv2d(l) => l.backward(grad_output),
            Layer::BatchNorm2d(l) => l.backward(grad_output),
            Layer::MaxPool2d(l) => l.backward(grad_output),
            Layer::GlobalAvgPool(l) => l.backward(grad_output),
            Layer::Activation(l) => l.backward(grad_output),
            Layer::Softmax(l) => l.backward(grad_output),
        }
    }

    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        match self {
            Layer::Dense(l) => l.params_mut(),
            Layer::Conv2d(l) => l.params_mut(),
            Layer::BatchNorm2d(l) => l.params_mut(),
            _ => Vec::new(),
        }
    }

    pub fn params(&self) -> Vec<&Param> {
        match self {
            Layer::Dense(l) => l.params(),
            Layer::Conv2d(l) => l.params(),
            Layer::BatchNorm2d(l) => l.params(),
            _ => Vec::new(),
        }
    }
}
