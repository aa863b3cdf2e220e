pub mod accuracy;
pub mod distance;
pub mod ranking;

pub use distance::{compute_distance_matrix, DistanceMatrix, DistanceMetric};
pub use ranking::{evaluate, EvalOptions, EvalProtocol, RankingResult, SplitLabels};
