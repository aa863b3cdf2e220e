use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::{math::matrix::Matrix, activation::activation::ActivationFunction};

/// Fully connected layer operating on one sample (a 1×n row) at a time.
///
/// Gradients from successive `backward` calls are summed into an internal
/// buffer until `take_mean_gradients` drains it, so a mini-batch is a loop of
/// forward/backward pairs followed by one optimizer step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub size: usize,
    pub weights: Matrix,
    pub biases: Matrix,
    pub activator: ActivationFunction,
    #[serde(skip)]
    input: Matrix,
    #[serde(skip)]
    pre_neurons: Matrix,  // z = xW + b, needed for the activation derivative
    #[serde(skip)]
    grad_w: Matrix,
    #[serde(skip)]
    grad_b: Matrix,
    #[serde(skip)]
    grad_count: usize,
}

impl Layer {
    pub fn new<R: Rng>(size: usize, input_size: usize, activation: ActivationFunction, rng: &mut R) -> Layer {
        let weights = match activation {
            ActivationFunction::ReLU => Matrix::he(input_size, size, rng),
            _ => Matrix::xavier(input_size, size, rng),
        };
        Layer {
            size,
            weights,
            biases: Matrix::zeros(1, size),
            activator: activation,
            input: Matrix::default(),
            pre_neurons: Matrix::default(),
            grad_w: Matrix::default(),
            grad_b: Matrix::default(),
            grad_count: 0,
        }
    }

    pub fn num_params(&self) -> usize {
        self.weights.rows * self.weights.cols + self.biases.cols
    }

    /// Training-mode forward pass; caches input and pre-activation for `backward`.
    pub fn feed_from(&mut self, input: &[f64]) -> Vec<f64> {
        let x = Matrix::from_data(vec![input.to_vec()]);
        let z = x.clone() * self.weights.clone() + self.biases.clone();
        let a = z.map(|v| self.activator.function(v));
        self.input = x;
        self.pre_neurons = z;
        a.data[0].clone()
    }

    /// Eval-mode forward pass; leaves the training caches untouched.
    pub fn infer(&self, input: &[f64]) -> Vec<f64> {
        let x = Matrix::from_data(vec![input.to_vec()]);
        let z = x * self.weights.clone() + self.biases.clone();
        z.data[0].iter().map(|&v| self.activator.function(v)).collect()
    }

    /// Computes gradient adjustments. Returns (weights_grad, biases_grad).
    /// `next_layer_delta` is ∂L/∂a for this layer (error in activation space).
    pub fn compute_gradients(&self, next_layer_delta: Matrix, inputs: &Matrix) -> (Matrix, Matrix) {
        let act_derivative = self.pre_neurons.map(|x| self.activator.derivative(x));
        let layer_delta = next_layer_delta.hadamard(&act_derivative);

        let weights_adjustment = inputs.transpose() * layer_delta.clone();
        let biases_adjustment = layer_delta;

        (weights_adjustment, biases_adjustment)
    }

    /// Accumulates gradients for the most recent `feed_from` and returns
    /// ∂L/∂input so the caller can keep propagating.
    pub fn backward(&mut self, delta: &[f64]) -> Vec<f64> {
        let delta = Matrix::from_data(vec![delta.to_vec()]);
        let (w_grad, b_grad) = self.compute_gradients(delta, &self.input);
        let upstream = b_grad.clone() * self.weights.transpose();

        if self.grad_count == 0 || !self.grad_w.same_shape(&w_grad) {
            self.grad_w = w_grad;
            self.grad_b = b_grad;
        } else {
            self.grad_w = std::mem::take(&mut self.grad_w) + w_grad;
            self.grad_b = std::mem::take(&mut self.grad_b) + b_grad;
        }
        self.grad_count += 1;

        upstream.data[0].clone()
    }

    /// Drains the gradient buffer, returning gradients averaged over
    /// `batch_len` samples, or `None` when nothing was accumulated.
    pub fn take_mean_gradients(&mut self, batch_len: usize) -> Option<(Matrix, Matrix)> {
        if self.grad_count == 0 {
            return None;
        }
        let inv = 1.0 / batch_len.max(1) as f64;
        let w = std::mem::take(&mut self.grad_w).map(|x| x * inv);
        let b = std::mem::take(&mut self.grad_b).map(|x| x * inv);
        self.grad_count = 0;
        Some((w, b))
    }

    pub fn clear_gradients(&mut self) {
        self.grad_w = Matrix::default();
        self.grad_b = Matrix::default();
        self.grad_count = 0;
    }

    /// Applies pre-computed gradients scaled by lr, with L2 decay on weights.
    pub fn apply_gradients(&mut self, weights_grad: Matrix, biases_grad: Matrix, lr: f64, weight_decay: f64) {
        let decayed = self.weights.map(|w| w * weight_decay);
        self.weights = self.weights.clone() - (weights_grad + decayed).map(|x| x * lr);
        self.biases = self.biases.clone() - biases_grad.map(|x| x * lr);
    }
}
