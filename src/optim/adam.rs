use crate::layers::param::Param;
use crate::math::matrix::Matrix;
use crate::optim::optimizer::Optimizer;

/// Adam with bias-corrected first and second moment estimates.
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    t: u64,
    m: Vec<Matrix>,
    v: Vec<Matrix>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Adam {
        Adam::with_betas(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(learning_rate: f64, beta1: f64, beta2: f64, eps: f64) -> Adam {
        Adam { learning_rate, beta1, beta2, eps, t: 0, m: Vec::new(), v: Vec::new() }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut Param]) {
        if self.m.len() != params.len() {
            self.m = params.iter().map(|p| Matrix::zeros(p.value.rows, p.value.cols)).collect();
            self.v = self.m.clone();
            self.t = 0;
        }
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);

        for ((param, m), v) in params.iter_mut().zip(self.m.iter_mut()).zip(self.v.iter_mut()) {
            let grad = param.grad_mut().clone();
            for i in 0..grad.rows {
                for j in 0..grad.cols {
                    let g = grad.data[i][j];
                    let mij = &mut m.data[i][j];
                    let vij = &mut v.data[i][j];
                    *mij = self.beta1 * *mij + (1.0 - self.beta1) * g;
                    *vij = self.beta2 * *vij + (1.0 - self.beta2) * g * g;
                    let m_hat = *mij / bc1;
                    let v_hat = *vij / bc2;
                    param.value.data[i][j] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.eps);
                }
            }
        }
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn name(&self) -> &'static str {
        "adam"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::param::ParamRole;
    use approx::assert_relative_eq;

    #[test]
    fn first_step_has_magnitude_lr() {
        let mut p = Param::new(ParamRole::Bias, 1, Matrix::zeros(1, 2));
        p.grad_mut().data[0] = vec![5.0, -0.01];
        let mut opt = Adam::new(0.01);
        opt.step(&mut [&mut p]);
        assert_relative_eq!(p.value.data[0][0], -0.01, epsilon = 1e-6);
        assert_relative_eq!(p.value.data[0][1], 0.01, epsilon = 1e-5);
    }

    #[test]
    fn minimizes_a_quadratic() {
        let mut p = Param::new(ParamRole::DenseWeight, 1, Matrix::from_rows(vec![vec![3.0]]).unwrap());
        let mut opt = Adam::new(0.1);
        for _ in 0..500 {
            p.zero_grad();
            let w = p.value.data[0][0];
            p.grad_mut().data[0][0] = 2.0 * (w - 1.0);
            opt.step(&mut [&mut p]);
        }
        assert_relative_eq!(p.value.data[0][0], 1.0, epsilon = 1e-2);
    }
}
