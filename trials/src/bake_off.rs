use log::info;
use std::{path::Path, time::Instant};

use retainer::{CheckpointStore, Config, FeedForward, Mode, Result, Splits, TaskLoop, TaskRecord};

pub struct Entry {
    pub name: &'static str,
    pub records: Vec<TaskRecord>,
    pub seconds: f64,
}

/// Scaled-down experiment both contestants share.
pub fn trial_config(mode: Mode, epochs: usize, seed: u64) -> Config {
    let base = match mode {
        Mode::Selective => Config::new(),
        Mode::L2 => Config::l2_baseline(),
    };

    let mut config = Config {
        classes: (0..5).collect(),
        layers: vec![20, 48, 24, 5],
        batch_size: 32,
        epochs,
        epochs_drop: (epochs / 4).max(1),
        seed,
        ..base
    };
    config.synthetic.train_per_class = 60;
    config.synthetic.valid_per_class = 20;
    config.synthetic.test_per_class = 20;
    config
}

fn run_one(name: &'static str, config: Config, data: &Splits, root: &Path) -> Result<Entry> {
    let store = CheckpointStore::open_run(root)?;
    info!("{} checkpoints in {}", name, store.dir().display());

    let network = FeedForward::new(&config.layers, config.seed);
    let mut task_loop = TaskLoop::new(config, network, store)?;

    let start = Instant::now();
    let records = task_loop.run(data)?;

    Ok(Entry {
        name,
        records,
        seconds: start.elapsed().as_secs_f64(),
    })
}

/// Selective retraining against the L2 transfer baseline on identical data.
pub fn bake_off(epochs: usize, seed: u64, root: &Path) -> Result<(Entry, Entry)> {
    let selective = trial_config(Mode::Selective, epochs, seed);
    let l2 = trial_config(Mode::L2, epochs, seed);
    let data = Splits::synthetic(&selective)?;

    info!("baking selective...");
    let a = run_one("selective", selective, &data, root)?;
    info!("baking l2...");
    let b = run_one("l2", l2, &data, root)?;

    Ok((a, b))
}

pub fn report(a: &Entry, b: &Entry) -> String {
    let mut out = format!("task\t{}\t{}", a.name, b.name);
    for (ra, rb) in a.records.iter().zip(b.records.iter()) {
        out.push_str(&format!("\n{}\t{:.4}\t{:.4}", ra.task + 1, ra.auroc, rb.auroc));
    }

    let last = |e: &Entry| e.records.last().map(|r| r.auroc).unwrap_or(f64::NAN);
    out.push_str(&format!(
        "\na) {} finished {} tasks in {:.1} seconds",
        a.name,
        a.records.len(),
        a.seconds
    ));
    out.push_str(&format!(
        "\nb) {} finished {} tasks in {:.1} seconds",
        b.name,
        b.records.len(),
        b.seconds
    ));

    match last(a) >= last(b) {
        true => out.push_str(&format!("\n{} retains more by the last task", a.name)),
        false => out.push_str(&format!("\n{} retains more by the last task", b.name)),
    }
    out
}
