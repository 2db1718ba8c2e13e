pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod hook;
pub mod loss;
pub mod metric;
pub mod network;
pub mod optim;
pub mod param;
pub mod penalty;
pub mod propagator;
pub mod selector;
pub mod task_loop;

pub use checkpoint::CheckpointStore;
pub use config::{Config, Mode};
pub use data::Splits;
pub use error::{Error, Result};
pub use network::FeedForward;
pub use task_loop::{TaskLoop, TaskRecord};
