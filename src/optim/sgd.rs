use crate::layers::dense::Layer;

#[derive(Debug, Clone)]
pub struct Sgd {
    pub learning_rate: f64,
    pub weight_decay: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Sgd {
        Sgd { learning_rate, weight_decay: 0.0 }
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Sgd {
        self.weight_decay = weight_decay;
        self
    }

    /// Applies one update to `layer` from the gradients it accumulated over
    /// `batch_len` samples. Layers with no accumulated gradient are left as is.
    pub fn step(&self, layer: &mut Layer, batch_len: usize) {
        if let Some((w_grad, b_grad)) = layer.take_mean_gradients(batch_len) {
            layer.apply_gradients(w_grad, b_grad, self.learning_rate, self.weight_decay);
        }
    }
}
