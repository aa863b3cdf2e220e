pub mod checkpoint;
pub mod epoch_stats;
pub mod evaluate;
pub mod loop_fn;
pub mod meter;
pub mod phase;
pub mod train_config;

pub use checkpoint::{BestRecord, Checkpoint, CheckpointDecision, CheckpointManager, CheckpointStore};
pub use epoch_stats::{EpochStats, EvalRecord};
pub use evaluate::{check_input_dim, extract_features, test_ranking, test_rotation, EvalReport, RotationReport};
pub use loop_fn::{train_loop, TrainSummary};
pub use meter::AverageMeter;
pub use phase::{PhaseSchedule, TrainingPhase};
pub use train_config::TrainConfig;
