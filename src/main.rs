//! `ferrite-reid` binary: trains or evaluates an embedding model on a
//! re-identification dataset.
//!
//! # Usage
//!
//! ```bash
//! ferrite-reid --synthetic --max-epoch 20 --eval-step 5
//! ferrite-reid --dataset market.json --config train.json --label-smooth
//! ferrite-reid --dataset market.json --evaluate --resume log/best_model.json --visualize-ranks
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use ferrite_reid::data::synthetic::SyntheticConfig;
use ferrite_reid::network::model::ReidModel;
use ferrite_reid::train::checkpoint::CheckpointStore;
use ferrite_reid::train::evaluate::{check_input_dim, test_ranking};
use ferrite_reid::viz::{plot_delta_theta, ranked::DEFAULT_TOPK, visualize_ranked_results};
use ferrite_reid::{
    train_loop, DistanceMetric, EmbeddingNet, NetworkSpec, ReidDataset, ReidError, ReidResult,
    TrainConfig,
};

/// Command-line arguments. Options given here override the config file.
#[derive(Parser, Debug)]
#[command(name = "ferrite-reid", version, about = "Person re-identification training and evaluation")]
struct Args {
    /// JSON `TrainConfig`; defaults are used when absent.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON dataset with train/query/gallery splits.
    #[arg(long, value_name = "FILE", conflicts_with = "synthetic")]
    dataset: Option<PathBuf>,

    /// Use the deterministic synthetic dataset.
    #[arg(long)]
    synthetic: bool,

    /// JSON `NetworkSpec`; otherwise one is derived from the dataset.
    #[arg(long, value_name = "FILE")]
    network: Option<PathBuf>,

    #[arg(long, default_value_t = 32)]
    embedding_dim: usize,

    #[arg(long, value_delimiter = ',')]
    hidden: Vec<usize>,

    /// Backbone layers that get an extra classifier (deep supervision).
    #[arg(long, value_delimiter = ',')]
    deep_supervision: Vec<usize>,

    #[arg(long)]
    max_epoch: Option<usize>,
    #[arg(long)]
    start_epoch: Option<usize>,
    #[arg(long)]
    train_batch: Option<usize>,
    #[arg(long)]
    test_batch: Option<usize>,
    #[arg(long)]
    lr: Option<f64>,
    #[arg(long)]
    weight_decay: Option<f64>,
    /// Enable the multi-step learning-rate schedule.
    #[arg(long)]
    lr_schedule: bool,
    #[arg(long, value_delimiter = ',')]
    stepsize: Option<Vec<usize>>,
    #[arg(long)]
    gamma: Option<f64>,
    #[arg(long)]
    fixbase_epoch: Option<usize>,
    #[arg(long)]
    fixbase_lr: Option<f64>,
    #[arg(long)]
    freeze_bn: bool,
    #[arg(long)]
    label_smooth: bool,
    #[arg(long)]
    use_sigmoid: bool,
    /// Epoch at which adaptive label smoothing starts.
    #[arg(long)]
    initial_train: Option<usize>,
    #[arg(long)]
    lambda_xent: Option<f64>,
    /// Evaluate every N epochs (-1: only after the last one).
    #[arg(long, allow_hyphen_values = true)]
    eval_step: Option<i64>,
    #[arg(long)]
    start_eval: Option<usize>,
    #[arg(long)]
    use_metric_cuhk03: bool,
    /// Distance metric: euclidean or cosine.
    #[arg(long)]
    metric: Option<DistanceMetric>,
    #[arg(long)]
    max_rank: Option<usize>,
    /// Train and test the rotation-prediction head instead of identities.
    #[arg(long)]
    test_rot: bool,
    #[arg(long)]
    print_freq: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, value_name = "DIR")]
    save_dir: Option<PathBuf>,
    /// Resume from a checkpoint (fatal if unreadable).
    #[arg(long, value_name = "FILE")]
    resume: Option<PathBuf>,
    /// Best-effort partial weight load.
    #[arg(long, value_name = "FILE")]
    load_weights: Option<PathBuf>,

    /// Evaluate only; no training.
    #[arg(long)]
    evaluate: bool,
    /// Write ranked-result strips (evaluation mode).
    #[arg(long, requires = "evaluate")]
    visualize_ranks: bool,
    /// Evaluate with cosine distance and write angular margins.
    #[arg(long, requires = "evaluate")]
    plot_delta_theta: bool,

    /// Write the loaded (or generated) dataset as JSON and continue.
    #[arg(long, value_name = "FILE")]
    export_dataset: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level_filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(log_level_filter)
        .with_target(false)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(ReidError::Interrupted { epoch }) => {
            warn!("Exiting after interrupt at epoch {}", epoch + 1);
            ExitCode::from(130)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> ReidResult<()> {
    let mut config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            TrainConfig::from_json(path)?
        }
        None => TrainConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    let dataset = match &args.dataset {
        Some(path) => ReidDataset::load_json(path)?,
        None => {
            if !args.synthetic {
                info!("No dataset given; using the synthetic dataset");
            }
            ReidDataset::synthetic(&SyntheticConfig {
                num_rot_classes: config.rotation_mode.then_some(config.num_rot_classes),
                seed: config.seed,
                ..SyntheticConfig::default()
            })
        }
    };
    dataset.log_summary();
    if let Some(path) = &args.export_dataset {
        dataset.save_json(path)?;
        info!("Dataset written to {}", path.display());
    }

    let spec = match &args.network {
        Some(path) => NetworkSpec::load_json(path)?,
        None => NetworkSpec {
            hidden: args.hidden.clone(),
            deep_supervision: args.deep_supervision.clone(),
            num_rot_classes: config.num_rot_classes,
            ..NetworkSpec::new(dataset.feature_dim(), args.embedding_dim, dataset.num_train_pids)
        },
    };
    let mut model = EmbeddingNet::new(spec, config.seed)?;
    check_input_dim(&model, &dataset)?;
    info!("Model size: {:.5}M parameters", model.num_params() as f64 / 1e6);

    if args.evaluate {
        return evaluate_only(&mut model, &dataset, &config, &args);
    }

    let store = CheckpointStore::new(&config.save_dir)?;
    model.spec.save_json(&store.dir().join("network.json"))?;
    let stop_flag = Arc::new(AtomicBool::new(false));
    spawn_interrupt_watcher(Arc::clone(&stop_flag));
    config.stop_flag = Some(stop_flag);

    let summary = train_loop(&mut model, &dataset, &config, &store)?;
    let history = store.dir().join("history.json");
    std::fs::write(&history, serde_json::to_string_pretty(&summary)?)?;
    info!("Run summary written to {}", history.display());
    Ok(())
}

fn evaluate_only(model: &mut EmbeddingNet, dataset: &ReidDataset, config: &TrainConfig, args: &Args) -> ReidResult<()> {
    let weights = config.resume.as_ref().or(config.load_weights.as_ref());
    if let Some(path) = &config.resume {
        let ckpt = CheckpointStore::load(path)?;
        model.load_state(&ckpt.model_state, true)?;
        info!("Loaded checkpoint {} (epoch {})", path.display(), ckpt.epoch + 1);
    } else if let Some(path) = &config.load_weights {
        if let Some(ckpt) = CheckpointStore::try_load(path) {
            let n = model.load_state(&ckpt.model_state, false)?;
            info!("Loaded {} tensors from {}", n, path.display());
        }
    }
    let out_dir = test_dir(&config.save_dir, weights.map(PathBuf::as_path));

    info!("Evaluate only");
    let metric = if args.plot_delta_theta { DistanceMetric::Cosine } else { config.metric };
    let report = test_ranking(&*model, dataset, metric, &config.eval_options(), config.test_batch)?;

    if args.visualize_ranks {
        visualize_ranked_results(&report.distmat, dataset, &out_dir.join("ranked_results"), DEFAULT_TOPK)?;
    }
    if args.plot_delta_theta {
        plot_delta_theta(&report.distmat, dataset, &out_dir.join("delta_theta_results"), 1)?;
    }
    Ok(())
}

/// Output directory for evaluation artifacts: the configured `save_dir`, or
/// the directory of the loaded weights when `save_dir` was left at its default.
fn test_dir(save_dir: &Path, weights: Option<&Path>) -> PathBuf {
    let default_dir = TrainConfig::default().save_dir;
    match weights.and_then(Path::parent) {
        Some(parent) if save_dir == default_dir => parent.to_path_buf(),
        _ => save_dir.to_path_buf(),
    }
}

/// Raises `flag` on ctrl-c. The watcher runs a single-threaded runtime on
/// its own thread so the training loop stays synchronous.
fn spawn_interrupt_watcher(flag: Arc<AtomicBool>) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build();
    let runtime = match runtime {
        Ok(rt) => rt,
        Err(e) => {
            warn!("Cannot install interrupt handler: {e}");
            return;
        }
    };
    std::thread::spawn(move || {
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping at the next batch");
                flag.store(true, Ordering::Relaxed);
            }
        });
    });
}

fn apply_overrides(config: &mut TrainConfig, args: &Args) {
    macro_rules! set {
        ($($field:ident),*) => {
            $(if let Some(v) = args.$field.clone() { config.$field = v; })*
        };
    }
    set!(max_epoch, start_epoch, train_batch, test_batch, lr, weight_decay, stepsize, gamma,
         fixbase_epoch, fixbase_lr, initial_train, lambda_xent, eval_step, start_eval, metric,
         print_freq, seed, save_dir);

    if args.max_rank.is_some() {
        config.max_rank = args.max_rank;
    }
    if args.resume.is_some() {
        config.resume = args.resume.clone();
    }
    if args.load_weights.is_some() {
        config.load_weights = args.load_weights.clone();
    }
    config.lr_schedule |= args.lr_schedule;
    config.freeze_bn |= args.freeze_bn;
    config.label_smooth |= args.label_smooth;
    config.use_sigmoid |= args.use_sigmoid;
    config.use_metric_cuhk03 |= args.use_metric_cuhk03;
    config.rotation_mode |= args.test_rot;
}
