use std::sync::mpsc;

use ferrite_reid::data::synthetic::SyntheticConfig;
use ferrite_reid::{train_loop, CheckpointStore, EmbeddingNet, NetworkSpec, ReidDataset, TrainConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let dataset = ReidDataset::synthetic(&SyntheticConfig::default());
    let spec = NetworkSpec {
        hidden: vec![24],
        ..NetworkSpec::new(dataset.feature_dim(), 16, dataset.num_train_pids)
    };
    let mut model = EmbeddingNet::new(spec, 7)?;

    let (tx, rx) = mpsc::channel();
    let config = TrainConfig {
        max_epoch: 12,
        train_batch: 8,
        lr: 0.05,
        fixbase_epoch: 2,
        fixbase_lr: 0.05,
        initial_train: 6,
        eval_step: 4,
        save_dir: std::env::temp_dir().join("ferrite_reid_demo"),
        progress_tx: Some(tx),
        ..TrainConfig::default()
    };
    let store = CheckpointStore::new(&config.save_dir)?;

    let printer = std::thread::spawn(move || {
        for stats in rx {
            let eval = stats.eval
                .map(|e| format!("  rank-1 {:.1}%", e.score * 100.0))
                .unwrap_or_default();
            println!(
                "epoch {:2}/{} [{}] loss {:.4}{}",
                stats.epoch, stats.total_epochs, stats.phase, stats.train_loss, eval
            );
        }
    });

    let summary = train_loop(&mut model, &dataset, &config, &store)?;
    drop(config);
    let _ = printer.join();

    if let (Some(score), Some(epoch)) = (summary.best_score, summary.best_epoch) {
        println!("best rank-1 {:.1}% at epoch {epoch}", score * 100.0);
    }
    Ok(())
}
