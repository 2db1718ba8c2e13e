use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, str::FromStr};

use crate::error::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Selective retraining with relevance-masked fine tuning.
    Selective,
    /// Whole-network retraining pulled toward the previous task by an L2 term.
    L2,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SyntheticConfig {
    pub train_per_class: usize,
    pub valid_per_class: usize,
    pub test_per_class: usize,
    pub spread: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub checkpoint_dir: String,
    pub mode: Mode,

    pub classes: Vec<usize>,
    pub layers: Vec<usize>,

    pub batch_size: usize,
    pub epochs: usize,

    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub lr_drop: f64,
    pub epochs_drop: usize,

    pub l1_coeff: f64,
    pub l2_coeff: f64,
    /// Weights at or below this magnitude do not carry relevance.
    pub zero_threshold: f64,

    pub seed: u64,
    pub synthetic: SyntheticConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Config> {
        let path = PathBuf::from_str(path).map_err(|e| Error::Config(e.to_string()))?;

        let config_bytes = fs::read(path)?;
        let config: Config = serde_json::from_slice(&config_bytes)?;
        config.validate()?;

        Ok(config)
    }

    pub fn new() -> Config {
        Config {
            checkpoint_dir: "./checkpoints/retainer".into(),
            mode: Mode::Selective,

            classes: (0..10).collect(),
            layers: vec![784, 312, 128, 10],

            batch_size: 256,
            epochs: 200,

            learning_rate: 0.01,
            momentum: 0.9,
            weight_decay: 0.,
            lr_drop: 0.5,
            epochs_drop: 20,

            l1_coeff: 1e-4,
            l2_coeff: 5e-3,
            zero_threshold: 1e-2,

            seed: 20,
            synthetic: SyntheticConfig {
                train_per_class: 200,
                valid_per_class: 50,
                test_per_class: 50,
                spread: 0.6,
            },
        }
    }

    /// Defaults of the L2 transfer baseline.
    pub fn l2_baseline() -> Config {
        Config {
            checkpoint_dir: "./checkpoints/retainer-l2".into(),
            mode: Mode::L2,
            weight_decay: 1e-4,
            epochs: 100,
            ..Config::new()
        }
    }

    pub fn dump(&self, path: &str) -> Result<()> {
        let path = PathBuf::from_str(path).map_err(|e| Error::Config(e.to_string()))?;
        let config_str = serde_json::to_string_pretty(&self)?;
        fs::write(path, config_str)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.layers.len() < 2 {
            return Err(Error::Config(
                "layers needs at least an input and an output width".into(),
            ));
        }
        if self.layers.iter().any(|w| *w == 0) {
            return Err(Error::Config("layer widths must be non-zero".into()));
        }
        if self.classes.is_empty() {
            return Err(Error::Config("no classes to learn".into()));
        }

        let out = self.num_classes();
        if let Some(cls) = self.classes.iter().find(|c| **c >= out) {
            return Err(Error::Config(format!(
                "class {} has no output unit (output width {})",
                cls, out
            )));
        }
        let mut seen = vec![false; out];
        for cls in self.classes.iter() {
            if seen[*cls] {
                return Err(Error::Config(format!("class {} is learned twice", cls)));
            }
            seen[*cls] = true;
        }

        if self.epochs == 0 || self.batch_size == 0 {
            return Err(Error::Config("epochs and batch_size must be non-zero".into()));
        }
        if !(self.zero_threshold > 0.) {
            return Err(Error::Config("zero_threshold must be positive".into()));
        }

        Ok(())
    }

    pub fn input_width(&self) -> usize {
        self.layers[0]
    }

    /// Output width: every class of the dataset, learned or not.
    pub fn num_classes(&self) -> usize {
        self.layers[self.layers.len() - 1]
    }
}
