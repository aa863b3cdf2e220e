pub mod adaptive;
pub mod bce;
pub mod criterion;
pub mod cross_entropy;

pub use adaptive::AdaptiveLabelSmooth;
pub use bce::BceLoss;
pub use criterion::{Criterion, LossEval};
pub use cross_entropy::CrossEntropyLoss;
