pub mod dense;
pub mod norm;

pub use dense::Layer;
pub use norm::RunningNorm;
