use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::layers::{expect_width, missing_cache};
use crate::math::matrix::Matrix;

/// Max pooling with a square window whose stride equals its size.
/// Trailing rows/columns that don't fill a window are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxPool2d {
    pub channels: usize,
    pub in_height: usize,
    pub in_width: usize,
    pub size: usize,
    /// Per-sample input index that won each output slot.
    #[serde(skip)]
    switches: Option<Vec<Vec<usize>>>,
}

impl MaxPool2d {
    pub fn new(channels: usize, in_height: usize, in_width: usize, size: usize) -> Result<MaxPool2d> {
        let pool = MaxPool2d { channels, in_height, in_width, size, switches: None };
        pool.validate()?;
        Ok(pool)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(TrainError::Config("max-pool needs at least one channel".into()));
        }
        if self.size == 0 || self.in_height < self.size || self.in_width < self.size {
            return Err(TrainError::shape(
                "max-pool input",
                format!("spatial size >= window {}", self.size),
                format!("{}x{}", self.in_height, self.in_width),
            ));
        }
        Ok(())
    }

    pub fn out_height(&self) -> usize {
        self.in_height / self.size
    }

    pub fn out_width(&self) -> usize {
        self.in_width / self.size
    }

    pub fn input_len(&self) -> usize {
        self.channels * self.in_height * self.in_width
    }

    pub fn output_len(&self) -> usize {
        self.channels * self.out_height() * self.out_width()
    }

    fn pool_row(&self, x: &[f64], out: &mut [f64], switches: &mut [usize]) {
        let (oh, ow) = (self.out_height(), self.out_width());
        let plane = self.in_height * self.in_width;
        for c in 0..self.channels {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut best_idx = c * plane + oy * self.size * self.in_width + ox * self.size;
                    for dy in 0..self.size {
                        for dx in 0..self.size {
                            let idx = c * plane + (oy * self.size + dy) * self.in_width + ox * self.size + dx;
                            if x[idx] > x[best_idx] {
                                best_idx = idx;
                            }
                        }
                    }
                    let o = (c * oh + oy) * ow + ox;
                    out[o] = x[best_idx];
                    switches[o] = best_idx;
                }
            }
        }
    }

    fn pool(&self, input: &Matrix) -> Result<(Matrix, Vec<Vec<usize>>)> {
        expect_width("max-pool input", self.input_len(), input)?;
        let mut out = Matrix::zeros(input.rows, self.output_len());
        let mut switches = vec![vec![0; self.output_len()]; input.rows];
        for ((x, y), sw) in input.data.iter().zip(out.data.iter_mut()).zip(switches.iter_mut()) {
            self.pool_row(x, y, sw);
        }
        Ok((out, switches))
    }

    pub fn forward(&self, input: &Matrix) -> Result<Matrix> {
        self.pool(input).map(|(out, _)| out)
    }

    pub fn forward_train(&mut self, input: &Matrix) -> Result<Matrix> {
        let (out, switches) = self.pool(input)?;
        self.switches = Some(switches);
        Ok(out)
    }

    /// Routes each output gradient back to the input that won the window.
    pub fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let switches = self.switches.take().ok_or_else(|| missing_cache("max-pool"))?;
        expect_width("max-pool gradient", self.output_len(), grad_output)?;
        if switches.len() != grad_output.rows {
            return Err(TrainError::shape("max-pool gradient rows", switches.len(), grad_output.rows));
        }
        let mut grad_input = Matrix::zeros(grad_output.rows, self.input_len());
        for ((g, sw), dx) in grad_output.data.iter().zip(switches.iter()).zip(grad_input.data.iter_mut()) {
            for (&go, &idx) in g.iter().zip(sw.iter()) {
                dx[idx] += go;
            }
        }
        Ok(grad_input)
    }
}

/// Averages each channel plane down to a single value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalAvgPool {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl GlobalAvgPool {
    pub fn new(channels: usize, height: usize, width: usize) -> Result<GlobalAvgPool> {
        let pool = GlobalAvgPool { channels, height, width };
        pool.validate()?;
        Ok(pool)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.height == 0 || self.width == 0 {
            return Err(TrainError::Config(format!(
                "global-avg-pool needs a non-empty input, got {}x{}x{}",
                self.channels, self.height, self.width
            )));
        }
        Ok(())
    }

    pub fn input_len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn forward(&self, input: &Matrix) -> Result<Matrix> {
        expect_width("global-avg-pool input", self.input_len(), input)?;
        let plane = self.height * self.width;
        let data = input.data.iter()
            .map(|x| {
                x.chunks(plane)
                    .map(|c| c.iter().sum::<f64>() / plane as f64)
                    .collect()
            })
            .collect();
        Ok(Matrix { rows: input.rows, cols: self.channels, data })
    }

    pub fn backward(&self, grad_output: &Matrix) -> Result<Matrix> {
        expect_width("global-avg-pool gradient", self.channels, grad_output)?;
        let plane = self.height * self.width;
        let scale = 1.0 / plane as f64;
        let data = grad_output.data.iter()
            .map(|g| g.iter().flat_map(|&go| std::iter::repeat(go * scale).take(plane)).collect())
            .collect();
        Ok(Matrix { rows: grad_output.rows, cols: self.input_len(), data })
    }
}
