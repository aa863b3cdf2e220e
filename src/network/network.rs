use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::activation::activation::ActivationFunction;
use crate::error::{ConfigError, ReidError, ReidResult};
use crate::layers::{dense::Layer, norm::RunningNorm};
use crate::math::matrix::Matrix;
use crate::network::model::{ModelOutput, OutputGrads, OutputHead, ParamScope, ReidModel};
use crate::network::spec::NetworkSpec;
use crate::optim::sgd::Sgd;

/// Identity classifier attached to the output of backbone layer `tap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxHead {
    pub tap: usize,
    pub layer: Layer,
}

/// Dense embedding network with identity, epsilon and rotation heads.
///
/// ```text
/// input ─► backbone[0] ─► … ─► backbone[n-1] ─► norm ─► embedding
///                 │                                        ├─► classifier  (logits)
///                 └─► aux heads (deep supervision)         ├─► epsilon     (sigmoid scalar)
///                                                          └─► rotation    (rotation logits)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingNet {
    pub spec: NetworkSpec,
    pub backbone: Vec<Layer>,
    pub norm: RunningNorm,
    pub classifier: Layer,
    pub aux_heads: Vec<AuxHead>,
    pub epsilon_head: Layer,
    pub rotation_head: Layer,
    #[serde(skip)]
    last_head: Option<OutputHead>,
}

impl EmbeddingNet {
    /// Builds a network with seeded weight initialization.
    pub fn new(spec: NetworkSpec, seed: u64) -> ReidResult<EmbeddingNet> {
        let widths = spec.backbone_widths();
        if let Some(&tap) = spec.deep_supervision.iter().find(|&&t| t >= widths.len()) {
            return Err(ConfigError::invalid_value(
                "deep_supervision",
                format!("tap {tap} is out of range for {} backbone layers", widths.len()),
            ).into());
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut backbone = Vec::with_capacity(widths.len());
        let mut fan_in = spec.input_dim;
        for &w in &widths {
            backbone.push(Layer::new(w, fan_in, spec.activation.clone(), &mut rng));
            fan_in = w;
        }

        let emb = spec.embedding_dim;
        let classifier = Layer::new(spec.num_classes, emb, ActivationFunction::Identity, &mut rng);
        let aux_heads = spec.deep_supervision.iter()
            .map(|&tap| AuxHead {
                tap,
                layer: Layer::new(spec.num_classes, widths[tap], ActivationFunction::Identity, &mut rng),
            })
            .collect();
        let epsilon_head = Layer::new(1, emb, ActivationFunction::Sigmoid, &mut rng);
        let rotation_head = Layer::new(spec.num_rot_classes, emb, ActivationFunction::Identity, &mut rng);

        Ok(EmbeddingNet {
            norm: RunningNorm::new(emb),
            spec,
            backbone,
            classifier,
            aux_heads,
            epsilon_head,
            rotation_head,
            last_head: None,
        })
    }

    fn backbone_infer(&self, input: &[f64]) -> Vec<f64> {
        let raw = self.backbone.iter().fold(input.to_vec(), |x, layer| layer.infer(&x));
        self.norm.infer(&raw)
    }

    fn named_layers(&self) -> Vec<(String, &Layer)> {
        let mut out: Vec<(String, &Layer)> = self.backbone.iter()
            .enumerate()
            .map(|(i, l)| (format!("backbone.{i}"), l))
            .collect();
        out.push(("classifier".into(), &self.classifier));
        out.extend(self.aux_heads.iter().enumerate().map(|(i, h)| (format!("aux.{i}"), &h.layer)));
        out.push(("epsilon".into(), &self.epsilon_head));
        out.push(("rotation".into(), &self.rotation_head));
        out
    }

    fn named_layers_mut(&mut self) -> Vec<(String, &mut Layer)> {
        let mut out: Vec<(String, &mut Layer)> = self.backbone.iter_mut()
            .enumerate()
            .map(|(i, l)| (format!("backbone.{i}"), l))
            .collect();
        out.push(("classifier".into(), &mut self.classifier));
        out.extend(self.aux_heads.iter_mut().enumerate().map(|(i, h)| (format!("aux.{i}"), &mut h.layer)));
        out.push(("epsilon".into(), &mut self.epsilon_head));
        out.push(("rotation".into(), &mut self.rotation_head));
        out
    }
}

fn add_into(acc: &mut [f64], v: &[f64]) {
    for (a, b) in acc.iter_mut().zip(v.iter()) {
        *a += b;
    }
}

/// Loads `src` into `dst` if shapes match. Returns whether it was loaded.
fn load_tensor(name: &str, dst: &mut Matrix, src: Option<&Matrix>, strict: bool) -> ReidResult<bool> {
    match src {
        Some(m) if m.same_shape(dst) => {
            *dst = m.clone();
            Ok(true)
        }
        Some(m) if strict => Err(ReidError::checkpoint(
            format!("tensor `{name}` has shape {}x{}, expected {}x{}", m.rows, m.cols, dst.rows, dst.cols),
            "",
        )),
        None if strict => Err(ReidError::checkpoint(format!("missing tensor `{name}`"), "")),
        _ => {
            debug!(tensor = name, "skipping tensor with missing or mismatched shape");
            Ok(false)
        }
    }
}

impl ReidModel for EmbeddingNet {
    fn forward(&mut self, input: &[f64], head: OutputHead) -> ModelOutput {
        let mut taps = Vec::with_capacity(self.backbone.len());
        let mut x = input.to_vec();
        for layer in &mut self.backbone {
            x = layer.feed_from(&x);
            taps.push(x.clone());
        }
        let emb = self.norm.feed_from(&x);
        self.last_head = Some(head);

        match head {
            OutputHead::Identity => {
                let mut heads = vec![self.classifier.feed_from(&emb)];
                for aux in &mut self.aux_heads {
                    heads.push(aux.layer.feed_from(&taps[aux.tap]));
                }
                let epsilon = self.epsilon_head.feed_from(&emb)[0];
                ModelOutput { heads, epsilon: Some(epsilon) }
            }
            OutputHead::Rotation => ModelOutput {
                heads: vec![self.rotation_head.feed_from(&emb)],
                epsilon: None,
            },
        }
    }

    fn backward(&mut self, grads: &OutputGrads) {
        let Some(head) = self.last_head else {
            warn!("backward called without a preceding forward pass");
            return;
        };

        let mut d_emb = vec![0.0; self.spec.embedding_dim];
        let mut d_taps: Vec<Vec<f64>> = self.backbone.iter().map(|l| vec![0.0; l.size]).collect();

        match head {
            OutputHead::Identity => {
                if let Some(g) = grads.heads.first() {
                    add_into(&mut d_emb, &self.classifier.backward(g));
                }
                for (aux, g) in self.aux_heads.iter_mut().zip(grads.heads.iter().skip(1)) {
                    add_into(&mut d_taps[aux.tap], &aux.layer.backward(g));
                }
                if let Some(g) = grads.epsilon {
                    add_into(&mut d_emb, &self.epsilon_head.backward(&[g]));
                }
            }
            OutputHead::Rotation => {
                if let Some(g) = grads.heads.first() {
                    add_into(&mut d_emb, &self.rotation_head.backward(g));
                }
            }
        }

        let mut delta = self.norm.backward(&d_emb);
        for i in (0..self.backbone.len()).rev() {
            add_into(&mut delta, &d_taps[i]);
            delta = self.backbone[i].backward(&delta);
        }
    }

    fn step(&mut self, scope: ParamScope, optimizer: &Sgd, batch_len: usize) {
        match scope {
            ParamScope::All => {
                for (_, layer) in self.named_layers_mut() {
                    optimizer.step(layer, batch_len);
                }
            }
            ParamScope::Classifier => {
                optimizer.step(&mut self.classifier, batch_len);
                for aux in &mut self.aux_heads {
                    optimizer.step(&mut aux.layer, batch_len);
                }
            }
            ParamScope::RotationHead => optimizer.step(&mut self.rotation_head, batch_len),
        }
        for (_, layer) in self.named_layers_mut() {
            layer.clear_gradients();
        }
    }

    fn input_dim(&self) -> usize {
        self.spec.input_dim
    }

    fn features(&self, input: &[f64]) -> Vec<f64> {
        self.backbone_infer(input)
    }

    fn rotation_logits(&self, input: &[f64]) -> Vec<f64> {
        self.rotation_head.infer(&self.backbone_infer(input))
    }

    fn has_classifier(&self) -> bool {
        self.spec.num_classes > 0
    }

    fn set_norm_frozen(&mut self, frozen: bool) {
        self.norm.frozen = frozen;
    }

    fn num_params(&self) -> usize {
        self.named_layers().iter().map(|(_, l)| l.num_params()).sum()
    }

    fn state(&self) -> ReidResult<serde_json::Value> {
        let mut tensors: BTreeMap<String, Matrix> = BTreeMap::new();
        for (name, layer) in self.named_layers() {
            tensors.insert(format!("{name}.weight"), layer.weights.clone());
            tensors.insert(format!("{name}.bias"), layer.biases.clone());
        }
        tensors.insert("norm.running_mean".into(), Matrix::from_data(vec![self.norm.running_mean.clone()]));
        tensors.insert("norm.running_var".into(), Matrix::from_data(vec![self.norm.running_var.clone()]));
        Ok(serde_json::to_value(tensors)?)
    }

    fn load_state(&mut self, state: &serde_json::Value, strict: bool) -> ReidResult<usize> {
        let tensors: BTreeMap<String, Matrix> = serde_json::from_value(state.clone())?;
        let mut loaded = 0;

        for (name, layer) in self.named_layers_mut() {
            let w = format!("{name}.weight");
            let b = format!("{name}.bias");
            loaded += load_tensor(&w, &mut layer.weights, tensors.get(&w), strict)? as usize;
            loaded += load_tensor(&b, &mut layer.biases, tensors.get(&b), strict)? as usize;
        }

        let mut mean = Matrix::from_data(vec![self.norm.running_mean.clone()]);
        let mut var = Matrix::from_data(vec![self.norm.running_var.clone()]);
        if load_tensor("norm.running_mean", &mut mean, tensors.get("norm.running_mean"), strict)? {
            self.norm.running_mean = mean.data.swap_remove(0);
            loaded += 1;
        }
        if load_tensor("norm.running_var", &mut var, tensors.get("norm.running_var"), strict)? {
            self.norm.running_var = var.data.swap_remove(0);
            loaded += 1;
        }

        if strict {
            let known = 2 * self.named_layers().len() + 2;
            if tensors.len() != known {
                return Err(ReidError::checkpoint(
                    format!("state holds {} tensors, model expects {known}", tensors.len()),
                    "",
                ));
            }
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_spec() -> NetworkSpec {
        let mut spec = NetworkSpec::new(4, 3, 5);
        spec.hidden = vec![6];
        spec.deep_supervision = vec![0];
        spec
    }

    #[test]
    fn identity_forward_yields_primary_and_aux_heads() {
        let mut net = EmbeddingNet::new(small_spec(), 7).unwrap();
        let out = net.forward(&[0.1, 0.2, 0.3, 0.4], OutputHead::Identity);
        assert_eq!(out.heads.len(), 2);
        assert_eq!(out.heads[0].len(), 5);
        let eps = out.epsilon.unwrap();
        assert!(eps > 0.0 && eps < 1.0);
    }

    #[test]
    fn classifier_scope_leaves_backbone_untouched() {
        let mut net = EmbeddingNet::new(small_spec(), 7).unwrap();
        let before = net.backbone[0].weights.clone();
        let cls_before = net.classifier.weights.clone();
        let out = net.forward(&[1.0, 0.0, -1.0, 0.5], OutputHead::Identity);
        let grads = OutputGrads {
            heads: out.heads.iter().map(|h| vec![0.5; h.len()]).collect(),
            epsilon: Some(0.1),
        };
        net.backward(&grads);
        net.step(ParamScope::Classifier, &Sgd::new(0.1), 1);
        assert_eq!(net.backbone[0].weights, before);
        assert_ne!(net.classifier.weights, cls_before);
    }

    #[test]
    fn state_round_trip_is_strict_loadable() {
        let net = EmbeddingNet::new(small_spec(), 1).unwrap();
        let mut other = EmbeddingNet::new(small_spec(), 2).unwrap();
        let n = other.load_state(&net.state().unwrap(), true).unwrap();
        // two backbone layers, classifier, one aux head, epsilon, rotation
        assert_eq!(n, 2 * 6 + 2);
        assert_eq!(other.classifier.weights, net.classifier.weights);
    }

    #[test]
    fn partial_load_skips_mismatched_classifier() {
        let net = EmbeddingNet::new(small_spec(), 1).unwrap();
        let mut spec = small_spec();
        spec.num_classes = 9;
        let mut other = EmbeddingNet::new(spec, 2).unwrap();
        assert!(other.load_state(&net.state().unwrap(), true).is_err());
        let loaded = other.load_state(&net.state().unwrap(), false).unwrap();
        assert_eq!(other.backbone[0].weights, net.backbone[0].weights);
        assert_eq!(loaded, 14 - 4);
    }

    #[test]
    fn out_of_range_tap_is_a_config_error() {
        let mut spec = small_spec();
        spec.deep_supervision = vec![2];
        let err = EmbeddingNet::new(spec, 1).unwrap_err();
        assert!(matches!(err, ReidError::Config(ConfigError::InvalidValue { field: "deep_supervision", .. })));
    }

    #[test]
    fn tanh_backbone_trains_and_stays_bounded() {
        let mut spec = small_spec();
        spec.activation = ActivationFunction::Tanh;
        let mut net = EmbeddingNet::new(spec, 3).unwrap();
        let input = [2.0, -1.0, 0.5, 3.0];
        let before = net.backbone[0].weights.clone();

        let out = net.forward(&input, OutputHead::Identity);
        net.backward(&OutputGrads {
            heads: out.heads.iter().map(|h| vec![0.2; h.len()]).collect(),
            epsilon: None,
        });
        net.step(ParamScope::All, &Sgd::new(0.1), 1);

        assert_ne!(net.backbone[0].weights, before);
        let hidden = net.backbone[0].infer(&input);
        assert!(hidden.iter().all(|v| v.abs() < 1.0));
    }
}
