use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result},
    network::NetworkState,
    task_loop::Phase,
};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CheckpointRecord {
    pub task: usize,
    pub phase: Phase,
    pub epoch: usize,
    pub loss: f64,
    pub state: NetworkState,
}

/// Directory of bincode blobs: one latest blob per phase and a single `best.bin`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<CheckpointStore> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(CheckpointStore { dir })
    }

    /// Opens a fresh `run-<uuid>` directory under `root`.
    pub fn open_run(root: impl AsRef<Path>) -> Result<CheckpointStore> {
        let run = format!("run-{}", uuid::Uuid::new_v4());
        CheckpointStore::open(root.as_ref().join(run))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn best_path(&self) -> PathBuf {
        self.dir.join("best.bin")
    }

    pub fn phase_path(&self, phase: Phase) -> PathBuf {
        self.dir.join(format!("{}.bin", phase.name()))
    }

    /// Where a finished task's best record is kept once `best.bin` moves on.
    pub fn task_path(&self, task: usize) -> PathBuf {
        self.dir.join(format!("task-{}.bin", task))
    }

    /// Copies `record` to its task's own file.
    pub fn archive(&self, record: &CheckpointRecord) -> Result<PathBuf> {
        let bytes = bincode::serialize(record)?;
        let path = self.task_path(record.task);
        CheckpointStore::write_atomic(&path, &bytes)?;
        Ok(path)
    }

    /// Writes the phase blob, and `best.bin` too when `is_best`.
    pub fn save(&self, record: &CheckpointRecord, is_best: bool) -> Result<PathBuf> {
        let bytes = bincode::serialize(record)?;

        let path = self.phase_path(record.phase);
        CheckpointStore::write_atomic(&path, &bytes)?;

        if is_best {
            let best = self.best_path();
            CheckpointStore::write_atomic(&best, &bytes)?;
            return Ok(best);
        }

        Ok(path)
    }

    /// Readers only ever see a complete file: the blob lands under a temp name first.
    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<CheckpointRecord> {
        let bytes = fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// The best record written while processing `task`.
    pub fn load_best(&self, task: usize) -> Result<CheckpointRecord> {
        let path = self.best_path();
        if !path.exists() {
            return Err(Error::MissingCheckpoint { task, path });
        }

        let record = self.load(&path)?;
        if record.task != task {
            return Err(Error::MissingCheckpoint { task, path });
        }

        Ok(record)
    }
}
