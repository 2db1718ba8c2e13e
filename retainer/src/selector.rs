use log::debug;

use crate::{
    checkpoint::{CheckpointRecord, CheckpointStore},
    error::{Error, Result},
    network::FeedForward,
    task_loop::Phase,
};

/// Starting point of every phase's running minimum.
pub const BEST_LOSS_SENTINEL: f64 = 1e10;

/// Keeps the lowest validation loss of one training phase and its parameters.
#[derive(Debug, Clone)]
pub struct CheckpointSelector {
    task: usize,
    phase: Phase,
    best_loss: f64,
    best_epoch: Option<usize>,
}

impl CheckpointSelector {
    pub fn new(task: usize, phase: Phase) -> CheckpointSelector {
        CheckpointSelector {
            task,
            phase,
            best_loss: BEST_LOSS_SENTINEL,
            best_epoch: None,
        }
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Persists the epoch's state, promoting it to best on a strict improvement.
    /// A NaN loss never improves.
    pub fn observe(
        &mut self,
        store: &CheckpointStore,
        epoch: usize,
        loss: f64,
        network: &FeedForward,
    ) -> Result<bool> {
        let is_best = loss < self.best_loss;
        if is_best {
            self.best_loss = loss;
            self.best_epoch = Some(epoch);
        }

        let record = CheckpointRecord {
            task: self.task,
            phase: self.phase,
            epoch,
            loss,
            state: network.state(),
        };
        store.save(&record, is_best)?;

        if is_best {
            debug!(
                "(selector) {} epoch {} new best {:.6}",
                self.phase.name(),
                epoch + 1,
                loss
            );
        }

        Ok(is_best)
    }

    /// Loads this phase's best state back into `network`.
    pub fn restore(&self, store: &CheckpointStore, network: &mut FeedForward) -> Result<CheckpointRecord> {
        let missing = || Error::MissingCheckpoint {
            task: self.task,
            path: store.best_path(),
        };

        if self.best_epoch.is_none() {
            return Err(missing());
        }

        let record = store.load_best(self.task)?;
        if record.phase != self.phase {
            return Err(missing());
        }

        network.load_state(&record.state)?;
        Ok(record)
    }
}
