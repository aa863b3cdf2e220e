use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::ReidResult;

/// Architecture of an [`EmbeddingNet`](crate::network::EmbeddingNet).
///
/// The backbone is `hidden` followed by one layer of width `embedding_dim`.
/// Each entry of `deep_supervision` names a backbone layer whose output gets
/// its own identity classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub input_dim: usize,
    pub hidden: Vec<usize>,
    pub embedding_dim: usize,
    pub num_classes: usize,
    #[serde(default)]
    pub deep_supervision: Vec<usize>,
    pub num_rot_classes: usize,
    pub activation: ActivationFunction,
}

impl NetworkSpec {
    pub fn new(input_dim: usize, embedding_dim: usize, num_classes: usize) -> NetworkSpec {
        NetworkSpec {
            input_dim,
            hidden: vec![],
            embedding_dim,
            num_classes,
            deep_supervision: vec![],
            num_rot_classes: 8,
            activation: ActivationFunction::ReLU,
        }
    }

    /// Output width of every backbone layer, input side first.
    pub fn backbone_widths(&self) -> Vec<usize> {
        let mut widths = self.hidden.clone();
        widths.push(self.embedding_dim);
        widths
    }

    pub fn save_json(&self, path: &Path) -> ReidResult<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> ReidResult<NetworkSpec> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
