use crate::layers::param::Param;
use crate::math::matrix::Matrix;
use crate::optim::optimizer::Optimizer;

/// Stochastic gradient descent with optional classical momentum:
/// `v ← μ·v + g`, `w ← w − lr·v`.
pub struct Sgd {
    pub learning_rate: f64,
    pub momentum: f64,
    velocity: Vec<Matrix>,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Sgd {
        Sgd::with_momentum(learning_rate, 0.0)
    }

    pub fn with_momentum(learning_rate: f64, momentum: f64) -> Sgd {
        Sgd { learning_rate, momentum, velocity: Vec::new() }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [&mut Param]) {
        if self.velocity.len() != params.len() {
            self.velocity = params.iter().map(|p| Matrix::zeros(p.value.rows, p.value.cols)).collect();
        }
        for (param, v) in params.iter_mut().zip(self.velocity.iter_mut()) {
            let grad = param.grad_mut().clone();
            for ((w_row, g_row), v_row) in param.value.data.iter_mut()
                .zip(grad.data.iter())
                .zip(v.data.iter_mut())
            {
                for ((w, g), vel) in w_row.iter_mut().zip(g_row.iter()).zip(v_row.iter_mut()) {
                    *vel = self.momentum * *vel + g;
                    *w -= self.learning_rate * *vel;
                }
            }
        }
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn name(&self) -> &'static str {
        "sgd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::param::ParamRole;
    use approx::assert_relative_eq;

    fn param_with_grad(value: f64, grad: f64) -> Param {
        let mut p = Param::new(ParamRole::DenseWeight, 1, Matrix::from_rows(vec![vec![value]]).unwrap());
        p.grad_mut().data[0][0] = grad;
        p
    }

    #[test]
    fn plain_step_moves_against_gradient() {
        let mut p = param_with_grad(1.0, 2.0);
        let mut opt = Sgd::new(0.1);
        opt.step(&mut [&mut p]);
        assert_relative_eq!(p.value.data[0][0], 0.8);
    }

    #[test]
    fn momentum_accumulates_velocity() {
        let mut p = param_with_grad(0.0, 1.0);
        let mut opt = Sgd::with_momentum(0.1, 0.9);
        opt.step(&mut [&mut p]);
        assert_relative_eq!(p.value.data[0][0], -0.1);
        // Same gradient again: v = 0.9 * 1 + 1 = 1.9.
        opt.step(&mut [&mut p]);
        assert_relative_eq!(p.value.data[0][0], -0.1 - 0.19);
    }
}
