pub mod schedule;
pub mod sgd;

pub use schedule::MultiStepLr;
pub use sgd::Sgd;
