pub mod delta_theta;
pub mod ranked;

pub use delta_theta::{compute_delta_theta, plot_delta_theta, DeltaTheta};
pub use ranked::visualize_ranked_results;
