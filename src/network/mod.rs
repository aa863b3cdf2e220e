pub mod model;
pub mod network;
pub mod spec;

pub use model::{ModelOutput, OutputGrads, OutputHead, ParamScope, ReidModel};
pub use network::EmbeddingNet;
pub use spec::NetworkSpec;
