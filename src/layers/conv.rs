use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::layers::param::{Param, ParamRole};
use crate::layers::{expect_param, expect_width, missing_cache};
use crate::math::matrix::Matrix;

/// Hyperparameters of a 2-D convolution over channel-major `(C, H, W)` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conv2dShape {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    pub in_height: usize,
    pub in_width: usize,
}

impl Conv2dShape {
    pub fn out_height(&self) -> usize {
        (self.in_height + 2 * self.padding - self.kernel) / self.stride + 1
    }

    pub fn out_width(&self) -> usize {
        (self.in_width + 2 * self.padding - self.kernel) / self.stride + 1
    }

    pub fn input_len(&self) -> usize {
        self.in_channels * self.in_height * self.in_width
    }

    pub fn output_len(&self) -> usize {
        self.out_channels * self.out_height() * self.out_width()
    }

    /// Taps per output unit.
    pub fn fan_in(&self) -> usize {
        self.in_channels * self.kernel * self.kernel
    }

    /// Output units each input channel position feeds.
    pub fn fan_out(&self) -> usize {
        self.out_channels * self.kernel * self.kernel
    }

    pub fn validate(&self) -> Result<()> {
        if self.kernel == 0 || self.stride == 0 || self.in_channels == 0 || self.out_channels == 0 {
            return Err(TrainError::Config(format!(
                "conv2d needs non-zero kernel, stride and channels, got {self:?}"
            )));
        }
        if self.in_height + 2 * self.padding < self.kernel
            || self.in_width + 2 * self.padding < self.kernel
        {
            return Err(TrainError::shape(
                "conv2d input",
                format!("spatial size >= kernel {} (padding {})", self.kernel, self.padding),
                format!("{}x{}", self.in_height, self.in_width),
            ));
        }
        Ok(())
    }
}

/// 2-D convolution. Weights are stored as `out_channels × (in_channels·k·k)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv2d {
    pub shape: Conv2dShape,
    pub weights: Param,
    pub biases: Option<Param>,
    #[serde(skip)]
    input_cache: Option<Matrix>,
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(shape: Conv2dShape, bias: bool, rng: &mut R) -> Result<Conv2d> {
        shape.validate()?;
        let fan_in = shape.fan_in();
        let weights = Param::new(
            ParamRole::ConvWeight,
            fan_in,
            Matrix::he(shape.out_channels, fan_in, fan_in, rng),
        )
        .with_fan_out(shape.fan_out());
        let biases = bias.then(|| Param::zeros(ParamRole::Bias, fan_in, 1, shape.out_channels));
        Ok(Conv2d { shape, weights, biases, input_cache: None })
    }

    /// Checks the geometry and parameter shapes of a conv that did not come
    /// from `new`, e.g. one read back from a checkpoint.
    pub fn validate(&self) -> Result<()> {
        self.shape.validate()?;
        expect_param("conv2d weights", &self.weights, self.shape.out_channels, self.shape.fan_in())?;
        if let Some(b) = &self.biases {
            expect_param("conv2d biases", b, 1, self.shape.out_channels)?;
        }
        Ok(())
    }

    /// Visits every in-bounds `(weight column, input offset)` tap of one
    /// output position. Zero padding contributes nothing, so it is skipped.
    fn for_each_tap<F: FnMut(usize, usize)>(&self, oy: usize, ox: usize, mut f: F) {
        let s = &self.shape;
        let plane = s.in_height * s.in_width;
        for ic in 0..s.in_channels {
            for ky in 0..s.kernel {
                let iy = (oy * s.stride + ky) as isize - s.padding as isize;
                if iy < 0 || iy >= s.in_height as isize {
                    continue;
                }
                for kx in 0..s.kernel {
                    let ix = (ox * s.stride + kx) as isize - s.padding as isize;
                    if ix < 0 || ix >= s.in_width as isize {
                        continue;
                    }
                    let w_col = (ic * s.kernel + ky) * s.kernel + kx;
                    let x_idx = ic * plane + iy as usize * s.in_width + ix as usize;
                    f(w_col, x_idx);
                }
            }
        }
    }

    pub fn forward(&self, input: &Matrix) -> Result<Matrix> {
        let s = self.shape;
        expect_width("conv2d input", s.input_len(), input)?;
        let (oh, ow) = (s.out_height(), s.out_width());
        let mut out = Matrix::zeros(input.rows, s.output_len());

        for (x, y) in input.data.iter().zip(out.data.iter_mut()) {
            for oc in 0..s.out_channels {
                let w = &self.weights.value.data[oc];
                let b = self.biases.as_ref().map_or(0.0, |p| p.value.data[0][oc]);
                for oy in 0..oh {
                    for ox in 0..ow {
                        let mut sum = b;
                        self.for_each_tap(oy, ox, |w_col, x_idx| sum += w[w_col] * x[x_idx]);
                        y[(oc * oh + oy) * ow + ox] = sum;
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn forward_train(&mut self, input: &Matrix) -> Result<Matrix> {
        let out = self.forward(input)?;
        self.input_cache = Some(input.clone());
        Ok(out)
    }

    pub fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let input = self.input_cache.take().ok_or_else(|| missing_cache("conv2d"))?;
        let s = self.shape;
        expect_width("conv2d gradient", s.output_len(), grad_output)?;
        let (oh, ow) = (s.out_height(), s.out_width());

        let mut w_grad = Matrix::zeros(s.out_channels, s.fan_in());
        let mut b_grad = vec![0.0; s.out_channels];
        let mut grad_input = Matrix::zeros(input.rows, s.input_len());

        for ((x, g), dx) in input.data.iter()
            .zip(grad_output.data.iter())
            .zip(grad_input.data.iter_mut())
        {
            for oc in 0..s.out_channels {
                let w = &self.weights.value.data[oc];
                let dw = &mut w_grad.data[oc];
                for oy in 0..oh {
                    for ox in 0..ow {
                        let go = g[(oc * oh + oy) * ow + ox];
                        if go == 0.0 {
                            continue;
                        }
                        b_grad[oc] += go;
                        self.for_each_tap(oy, ox, |w_col, x_idx| {
                            dw[w_col] += go * x[x_idx];
                            dx[x_idx] += go * w[w_col];
                        });
                    }
                }
            }
        }

        self.weights.grad_mut().add_scaled(&w_grad, 1.0)?;
        if let Some(biases) = self.biases.as_mut() {
            let b_grad = Matrix { rows: 1, cols: s.out_channels, data: vec![b_grad] };
            biases.grad_mut().add_scaled(&b_grad, 1.0)?;
        }
        Ok(grad_input)
    }

    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = vec![&mut self.weights];
        if let Some(b) = self.biases.as_mut() {
            params.push(b);
        }
        params
    }

    pub fn params(&self) -> Vec<&Param> {
        let mut params = vec![&self.weights];
        if let Some(b) = self.biases.as_ref() {
            params.push(b);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::test_support::{check_input_gradient, check_param_gradient};
    use rand::{rngs::StdRng, SeedableRng};

    fn shape(stride: usize, padding: usize) -> Conv2dShape {
        Conv2dShape {
            in_channels: 2,
            out_channels: 3,
            kernel: 3,
            stride,
            padding,
            in_height: 5,
            in_width: 4,
        }
    }

    #[test]
    fn output_size_follows_stride_and_padding() {
        assert_eq!((shape(1, 0).out_height(), shape(1, 0).out_width()), (3, 2));
        assert_eq!((shape(2, 1).out_height(), shape(2, 1).out_width()), (3, 2));
        assert_eq!(shape(1, 1).output_len(), 3 * 5 * 4);
    }

    #[test]
    fn identity_kernel_copies_the_input() {
        let mut rng = StdRng::seed_from_u64(0);
        let s = Conv2dShape {
            in_channels: 1,
            out_channels: 1,
            kernel: 3,
            stride: 1,
            padding: 1,
            in_height: 2,
            in_width: 2,
        };
        let mut conv = Conv2d::new(s, false, &mut rng).unwrap();
        let mut w = vec![0.0; 9];
        w[4] = 1.0;
        conv.weights.value = Matrix::from_rows(vec![w]).unwrap();
        let x = Matrix::from_rows(vec![vec![1.0, 2.0, 3.0, 4.0]]).unwrap();
        assert_eq!(conv.forward(&x).unwrap(), x);
    }

    #[test]
    fn weights_record_both_fans() {
        let mut rng = StdRng::seed_from_u64(0);
        let conv = Conv2d::new(shape(1, 1), true, &mut rng).unwrap();
        assert_eq!((conv.weights.fan_in, conv.weights.fan_out), (2 * 9, 3 * 9));
    }

    #[test]
    fn kernel_larger_than_input_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut s = shape(1, 0);
        s.kernel = 7;
        assert!(Conv2d::new(s, true, &mut rng).is_err());
    }

    #[test]
    fn validate_catches_a_zero_stride_and_foreign_weights() {
        let mut rng = StdRng::seed_from_u64(0);
        let conv = Conv2d::new(shape(1, 1), true, &mut rng).unwrap();
        assert!(conv.validate().is_ok());

        let mut zero_stride = conv.clone();
        zero_stride.shape.stride = 0;
        assert!(matches!(zero_stride.validate(), Err(TrainError::Config(_))));

        let mut wrong_weights = conv;
        wrong_weights.weights.value = Matrix::zeros(3, 4);
        assert!(matches!(wrong_weights.validate(), Err(TrainError::ShapeMismatch { .. })));
    }

    #[test]
    fn input_gradient_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(11);
        let conv = Conv2d::new(shape(2, 1), true, &mut rng).unwrap();
        let x = Matrix::he(2, conv.shape.input_len(), 4, &mut rng);
        check_input_gradient(
            &x,
            |m| conv.forward(m).unwrap(),
            |m, g| {
                let mut c = conv.clone();
                c.forward_train(m).unwrap();
                c.backward(g).unwrap()
            },
        );
    }

    #[test]
    fn weight_gradient_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(5);
        let conv = Conv2d::new(shape(1, 1), true, &mut rng).unwrap();
        let x = Matrix::he(2, conv.shape.input_len(), 4, &mut rng);
        check_param_gradient(
            &conv.weights.value,
            |w| {
                let mut c = conv.clone();
                c.weights.value = w.clone();
                c.forward(&x).unwrap()
            },
            |g| {
                let mut c = conv.clone();
                c.forward_train(&x).unwrap();
                c.backward(g).unwrap();
                c.weights.grad().clone()
            },
        );
    }
}
