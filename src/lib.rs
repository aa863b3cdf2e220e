pub mod error;
pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod metrics;
pub mod data;
pub mod train;
pub mod viz;

// Convenience re-exports
pub use error::{ConfigError, ReidError, ReidResult};
pub use math::matrix::Matrix;
pub use activation::activation::ActivationFunction;
pub use network::{EmbeddingNet, NetworkSpec, ReidModel};
pub use loss::criterion::Criterion;
pub use optim::sgd::Sgd;
pub use metrics::distance::{compute_distance_matrix, DistanceMatrix, DistanceMetric};
pub use metrics::ranking::{evaluate, EvalOptions, EvalProtocol, RankingResult, SplitLabels};
pub use data::dataset::{ReidDataset, Sample};
pub use train::checkpoint::{CheckpointManager, CheckpointStore};
pub use train::loop_fn::{train_loop, TrainSummary};
pub use train::phase::TrainingPhase;
pub use train::train_config::TrainConfig;
