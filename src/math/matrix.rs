use rand::Rng;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;

use crate::error::{Result, TrainError};

/// Row-major dense matrix. In batch tensors each row is one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix{
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<Vec<f64>>
}

impl Matrix{
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix{
            rows,
            cols,
            data: vec![vec![0.0; cols]; rows]
        }
    }

    /// Builds a matrix from rows, rejecting ragged input.
    pub fn from_rows(data: Vec<Vec<f64>>) -> Result<Matrix> {
        let cols = data.first().map(|r| r.len()).unwrap_or(0);
        if let Some((i, row)) = data.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(TrainError::shape(format!("matrix row {i}"), cols, row.len()));
        }
        Ok(Matrix { rows: data.len(), cols, data })
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
        // Both uniforms in (0, 1] to avoid log(0).
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    fn normal<R: Rng + ?Sized>(rows: usize, cols: usize, std_dev: f64, rng: &mut R) -> Matrix {
        let mut res = Matrix::zeros(rows, cols);
        for row in res.data.iter_mut() {
            for x in row.iter_mut() {
                *x = Matrix::sample_standard_normal(rng) * std_dev;
            }
        }
        res
    }

    /// He initialization: samples from N(0, sqrt(2 / fan_in)).
    ///
    /// Recommended before ReLU layers. The variance 2/fan_in accounts for
    /// the fact that ReLU zeroes half of its inputs on average.
    pub fn he<R: Rng + ?Sized>(rows: usize, cols: usize, fan_in: usize, rng: &mut R) -> Matrix {
        let std_dev = (2.0 / fan_in.max(1) as f64).sqrt();
        Matrix::normal(rows, cols, std_dev, rng)
    }

    /// Xavier (Glorot) initialization: samples from
    /// N(0, sqrt(2 / (fan_in + fan_out))).
    ///
    /// Recommended before Sigmoid/Tanh/Identity layers.
    pub fn xavier<R: Rng + ?Sized>(
        rows: usize,
        cols: usize,
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Matrix {
        let std_dev = (2.0 / (fan_in + fan_out).max(1) as f64).sqrt();
        Matrix::normal(rows, cols, std_dev, rng)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn transpose(&self) -> Matrix {
        let mut res = Matrix::zeros(self.cols, self.rows);

        for i in 0..res.rows {
            for j in 0..res.cols {
                res.data[i][j] = self.data[j][i];
            }
        }

        res
    }

    pub fn map<F>(&self, functor: F) -> Matrix
    where
        F: Fn(f64) -> f64,
    {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter()
                .map(|row| row.iter().map(|&x| functor(x)).collect())
                .collect(),
        }
    }

    /// Element-wise combination of two same-shape matrices.
    pub fn zip_map<F>(&self, other: &Matrix, functor: F) -> Result<Matrix>
    where
        F: Fn(f64, f64) -> f64,
    {
        if self.shape() != other.shape() {
            return Err(TrainError::shape(
                "element-wise op",
                format!("{:?}", self.shape()),
                format!("{:?}", other.shape()),
            ));
        }
        let data = self.data.iter().zip(other.data.iter())
            .map(|(a, b)| a.iter().zip(b.iter()).map(|(&x, &y)| functor(x, y)).collect())
            .collect();
        Ok(Matrix { rows: self.rows, cols: self.cols, data })
    }

    pub fn matmul(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.cols != rhs.rows {
            return Err(TrainError::shape(
                "matmul",
                format!("lhs cols == rhs rows ({})", self.cols),
                rhs.rows,
            ));
        }

        let mut res = Matrix::zeros(self.rows, rhs.cols);

        for i in 0..self.rows {
            let out = &mut res.data[i];
            for k in 0..self.cols {
                let a = self.data[i][k];
                if a == 0.0 {
                    continue;
                }
                for (o, &b) in out.iter_mut().zip(rhs.data[k].iter()) {
                    *o += a * b;
                }
            }
        }

        Ok(res)
    }

    /// Adds a `1 × cols` row vector to every row.
    pub fn add_row(&self, row: &Matrix) -> Result<Matrix> {
        if row.rows != 1 || row.cols != self.cols {
            return Err(TrainError::shape(
                "row broadcast",
                format!("(1, {})", self.cols),
                format!("{:?}", row.shape()),
            ));
        }
        let bias = &row.data[0];
        let data = self.data.iter()
            .map(|r| r.iter().zip(bias.iter()).map(|(x, b)| x + b).collect())
            .collect();
        Ok(Matrix { rows: self.rows, cols: self.cols, data })
    }

    /// Column sums as a `1 × cols` matrix.
    pub fn column_sums(&self) -> Matrix {
        let mut sums = vec![0.0; self.cols];
        for row in &self.data {
            for (s, x) in sums.iter_mut().zip(row.iter()) {
                *s += x;
            }
        }
        Matrix { rows: 1, cols: self.cols, data: vec![sums] }
    }

    /// In-place `self += other * scale`.
    pub fn add_scaled(&mut self, other: &Matrix, scale: f64) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(TrainError::shape(
                "accumulate",
                format!("{:?}", self.shape()),
                format!("{:?}", other.shape()),
            ));
        }
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            for (x, y) in a.iter_mut().zip(b.iter()) {
                *x += y * scale;
            }
        }
        Ok(())
    }

    pub fn fill(&mut self, value: f64) {
        for row in self.data.iter_mut() {
            row.iter_mut().for_each(|x| *x = value);
        }
    }

    /// Index of the largest entry in row `i`; the first one wins on ties.
    pub fn argmax_row(&self, i: usize) -> usize {
        let row = &self.data[i];
        let mut best = 0;
        for (j, &x) in row.iter().enumerate().skip(1) {
            if x > row[best] {
                best = j;
            }
        }
        best
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix { rows: 0, cols: 0, data: vec![] }
    }
}
