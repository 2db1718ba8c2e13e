use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{
    checkpoint::CheckpointStore,
    config::{Config, Mode},
    data::{BatchSource, Splits},
    error::{Error, Result},
    hook::HookHandle,
    loss::{restrict_targets, BinaryCrossEntropy},
    metric::avg_auroc,
    network::{FeedForward, NetworkState},
    optim::{Sgd, SgdConfig, StepDecay},
    penalty::Penalty,
    propagator::{self, LayerSelection},
    selector::CheckpointSelector,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// First task: whole network, L1 for sparsity.
    InitialLearn,
    /// Whole network with the L2 pull toward the previous task.
    Learn,
    SelectiveRetrain,
    NeuronSelection,
    FullRetrain,
    Detach,
    Evaluate,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::InitialLearn => "initial-learn",
            Phase::Learn => "learn",
            Phase::SelectiveRetrain => "selective-retrain",
            Phase::NeuronSelection => "neuron-selection",
            Phase::FullRetrain => "full-retrain",
            Phase::Detach => "detach",
            Phase::Evaluate => "evaluate",
        }
    }
}

/// Phase sequence a task walks through.
pub fn phases_for(mode: Mode, task: usize) -> Vec<Phase> {
    match (mode, task) {
        (Mode::Selective, 0) => vec![Phase::InitialLearn, Phase::Evaluate],
        (Mode::Selective, _) => vec![
            Phase::SelectiveRetrain,
            Phase::NeuronSelection,
            Phase::FullRetrain,
            Phase::Detach,
            Phase::Evaluate,
        ],
        (Mode::L2, _) => vec![Phase::Learn, Phase::Evaluate],
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskRecord {
    pub task: usize,
    pub class: usize,
    /// Best validation loss of the task's last training phase.
    pub best_loss: f64,
    /// This task's own copy of its best state.
    pub checkpoint: PathBuf,
    pub auroc: f64,
    /// Empty for tasks that skip neuron selection.
    pub selection: Vec<LayerSelection>,
}

/// One pass over a source. Trains when an optimizer is given; returns the
/// sample-weighted mean loss, penalty included.
pub fn run_epoch(
    network: &mut FeedForward,
    source: &dyn BatchSource,
    active: &[usize],
    mut optimizer: Option<&mut Sgd>,
    penalty: Option<&Penalty>,
) -> f64 {
    let criterion = BinaryCrossEntropy;
    let mut total = 0.;
    let mut seen = 0;

    for batch in source.batches() {
        let targets = restrict_targets(&batch.targets, active);
        let trace = network.forward_trace(&batch.inputs);

        let mut loss = criterion.loss(&trace.output, &targets);
        if let Some(p) = penalty {
            loss += p.value(network);
        }

        if let Some(opt) = optimizer.as_deref_mut() {
            network.zero_grad();
            let grad = criterion.grad_logits(&trace.output, &targets);
            network.backward(&trace, &grad, penalty);
            opt.step(network);
        }

        total += loss * batch.len() as f64;
        seen += batch.len();
    }

    if seen == 0 {
        return f64::NAN;
    }
    total / seen as f64
}

/// Per-task AUROC table, one line per task after the heading.
pub fn summary(records: &[TaskRecord]) -> String {
    let mut out = String::from("Average Per-task Performance over number of tasks");
    for (i, r) in records.iter().enumerate() {
        out.push_str(&format!("\n{}: {:.6}", i + 1, r.auroc));
    }
    out
}

/// Runs the configured task sequence over a single working network.
pub struct TaskLoop {
    config: Config,
    network: FeedForward,
    store: CheckpointStore,
    learned: Vec<usize>,
    records: Vec<TaskRecord>,
    /// Previous task's solution, for the L2 mode.
    anchor: Option<NetworkState>,
}

impl TaskLoop {
    pub fn new(config: Config, network: FeedForward, store: CheckpointStore) -> Result<TaskLoop> {
        config.validate()?;

        if network.widths() != config.layers {
            return Err(Error::Config(format!(
                "network widths {:?} differ from configured {:?}",
                network.widths(),
                config.layers
            )));
        }

        Ok(TaskLoop {
            config,
            network,
            store,
            learned: vec![],
            records: vec![],
            anchor: None,
        })
    }

    pub fn network(&self) -> &FeedForward {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut FeedForward {
        &mut self.network
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn records(&self) -> &[TaskRecord] {
        &self.records
    }

    pub fn into_network(self) -> FeedForward {
        self.network
    }

    pub fn run(&mut self, data: &Splits) -> Result<Vec<TaskRecord>> {
        data.check_widths()?;
        if data.input_width() != self.network.input_width() {
            return Err(Error::Dataset(format!(
                "inputs are {} wide, network expects {}",
                data.input_width(),
                self.network.input_width()
            )));
        }

        let classes = self.config.classes.clone();
        for (task, cls) in classes.into_iter().enumerate() {
            info!("Task: [{} | {}]", task + 1, self.config.classes.len());
            let record = self.run_task(task, cls, data)?;
            info!("AUROC: {}", record.auroc);
            self.records.push(record);
        }

        for line in summary(&self.records).lines() {
            info!("{}", line);
        }

        Ok(self.records.clone())
    }

    pub fn run_task(&mut self, task: usize, cls: usize, data: &Splits) -> Result<TaskRecord> {
        self.learned.push(cls);

        let mut snapshot: Option<FeedForward> = None;
        let mut handles: Vec<HookHandle> = vec![];
        let mut selection: Vec<LayerSelection> = vec![];
        let mut best_loss = f64::NAN;
        let mut auroc = f64::NAN;
        let mut checkpoint = self.store.task_path(task);
        let weight_decay = self.config.weight_decay;

        for phase in phases_for(self.config.mode, task) {
            match phase {
                Phase::InitialLearn => {
                    info!("==> Learning");
                    self.network.set_trainable(true);
                    let penalty = Penalty::l1(self.config.l1_coeff);
                    best_loss =
                        self.train_phase(task, cls, phase, Some(&penalty), weight_decay, data)?;
                }
                Phase::Learn => {
                    info!("==> Learning");
                    self.network.set_trainable(true);
                    let penalty = self.anchor.as_ref().map(|state| Penalty::L2 {
                        coeff: self.config.l2_coeff,
                        reference: state.clone(),
                    });
                    best_loss =
                        self.train_phase(task, cls, phase, penalty.as_ref(), weight_decay, data)?;
                }
                Phase::SelectiveRetrain => {
                    info!("==> Selective Retraining");
                    snapshot = Some(self.network.clone());

                    self.network.freeze_all_but_output();
                    let penalty = Penalty::l1(self.config.l1_coeff);
                    best_loss =
                        self.train_phase(task, cls, phase, Some(&penalty), weight_decay, data)?;

                    self.network.set_trainable(true);
                }
                Phase::NeuronSelection => {
                    info!("==> Selecting Neurons");
                    let mut reference = snapshot.take().ok_or(Error::PhaseOrder {
                        phase: phase.name(),
                        detail: "no snapshot from selective retraining",
                    })?;

                    let chosen = propagator::select_neurons(
                        &self.network,
                        &mut reference,
                        cls,
                        self.config.zero_threshold,
                    )?;

                    // the retrained network is dropped here; the snapshot carries on
                    reference.set_trainable(true);
                    self.network = reference;
                    handles = chosen.handles;
                    selection = chosen.report;
                }
                Phase::FullRetrain => {
                    info!("==> Training Selected Neurons");
                    best_loss = self.train_phase(task, cls, phase, None, 0., data)?;
                }
                Phase::Detach => {
                    let removed = propagator::detach(&mut self.network, &mut handles);
                    debug!("(task loop) detached {} gradient masks", removed);
                }
                Phase::Evaluate => {
                    info!("==> Calculating AUROC");
                    let record = self.store.load_best(task)?;
                    self.network.load_state(&record.state)?;
                    checkpoint = self.store.archive(&record)?;

                    auroc = avg_auroc(&self.network, &data.test, &self.learned)?;

                    if self.config.mode == Mode::L2 {
                        self.anchor = Some(self.network.state());
                    }
                }
            }
        }

        Ok(TaskRecord {
            task,
            class: cls,
            best_loss,
            checkpoint,
            auroc,
            selection,
        })
    }

    /// Trains for the configured epochs and leaves the network on its best epoch.
    fn train_phase(
        &mut self,
        task: usize,
        cls: usize,
        phase: Phase,
        penalty: Option<&Penalty>,
        weight_decay: f64,
        data: &Splits,
    ) -> Result<f64> {
        let epochs = self.config.epochs;
        let mut optimizer = Sgd::new(
            &self.network,
            SgdConfig {
                learning_rate: self.config.learning_rate,
                momentum: self.config.momentum,
                weight_decay,
            },
        );
        let mut decay = StepDecay::new(
            self.config.learning_rate,
            self.config.lr_drop,
            self.config.epochs_drop,
        );
        let mut selector = CheckpointSelector::new(task, phase);
        let active = [cls];

        for epoch in 0..epochs {
            if let Some(lr) = decay.on_epoch(epoch) {
                optimizer.set_lr(lr);
            }

            let train_loss = run_epoch(
                &mut self.network,
                &data.train,
                &active,
                Some(&mut optimizer),
                penalty,
            );
            let valid_loss = run_epoch(&mut self.network, &data.valid, &active, None, penalty);

            debug!(
                "Epoch: [{} | {}] train {:.6} valid {:.6}",
                epoch + 1,
                epochs,
                train_loss,
                valid_loss
            );

            selector.observe(&self.store, epoch, valid_loss, &self.network)?;
        }

        selector.restore(&self.store, &mut self.network)?;
        Ok(selector.best_loss())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_selective_task_only_learns_and_evaluates() {
        assert_eq!(
            phases_for(Mode::Selective, 0),
            vec![Phase::InitialLearn, Phase::Evaluate]
        );
    }

    #[test]
    fn later_selective_tasks_walk_every_phase() {
        for task in [1, 5] {
            assert_eq!(
                phases_for(Mode::Selective, task),
                vec![
                    Phase::SelectiveRetrain,
                    Phase::NeuronSelection,
                    Phase::FullRetrain,
                    Phase::Detach,
                    Phase::Evaluate,
                ]
            );
        }
    }

    #[test]
    fn l2_mode_learns_then_evaluates() {
        assert_eq!(phases_for(Mode::L2, 0), vec![Phase::Learn, Phase::Evaluate]);
        assert_eq!(phases_for(Mode::L2, 3), vec![Phase::Learn, Phase::Evaluate]);
    }

    #[test]
    fn phase_names_are_distinct() {
        let phases = [
            Phase::InitialLearn,
            Phase::Learn,
            Phase::SelectiveRetrain,
            Phase::NeuronSelection,
            Phase::FullRetrain,
            Phase::Detach,
            Phase::Evaluate,
        ];
        let mut names = phases.iter().map(|p| p.name()).collect::<Vec<&str>>();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), phases.len());
    }

    #[test]
    fn summary_lists_every_task() {
        let record = |task: usize, auroc: f64| TaskRecord {
            task,
            class: task,
            best_loss: 0.1,
            checkpoint: PathBuf::from("best.bin"),
            auroc,
            selection: vec![],
        };
        let text = summary(&[record(0, 0.9), record(1, 0.75)]);
        let lines = text.lines().collect::<Vec<&str>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "1: 0.900000");
        assert_eq!(lines[2], "2: 0.750000");
    }

    #[test]
    fn epoch_without_optimizer_leaves_weights() {
        use crate::data::InMemorySource;
        use ndarray::array;

        let mut network = FeedForward::from_weights(vec![array![[0.5, -0.5], [0.1, 0.2]]]).unwrap();
        let before = network.state();
        let source =
            InMemorySource::from_samples(array![[1.0, 0.0], [0.0, 1.0]], &[0, 1], 2, 1).unwrap();

        let loss = run_epoch(&mut network, &source, &[0], None, None);
        assert!(loss.is_finite() && loss > 0.);
        assert_eq!(network.state(), before);
    }

    #[test]
    fn training_epoch_lowers_loss() {
        use crate::data::InMemorySource;
        use ndarray::array;

        let mut network = FeedForward::from_weights(vec![array![[0.0, 0.0], [0.0, 0.0]]]).unwrap();
        let source = InMemorySource::from_samples(
            array![[1.0, 0.0], [0.0, 1.0], [1.0, 0.1], [0.1, 1.0]],
            &[0, 1, 0, 1],
            2,
            2,
        )
        .unwrap();
        let mut sgd = Sgd::new(
            &network,
            SgdConfig {
                learning_rate: 0.5,
                momentum: 0.,
                weight_decay: 0.,
            },
        );

        let before = run_epoch(&mut network, &source, &[0, 1], None, None);
        for _ in 0..20 {
            run_epoch(&mut network, &source, &[0, 1], Some(&mut sgd), None);
        }
        let after = run_epoch(&mut network, &source, &[0, 1], None, None);
        assert!(after < before);
    }
}
