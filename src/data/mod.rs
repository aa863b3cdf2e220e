pub mod dataset;
pub mod synthetic;

pub use dataset::{ReidDataset, Sample};
pub use synthetic::SyntheticConfig;
