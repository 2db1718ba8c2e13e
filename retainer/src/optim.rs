//! Momentum SGD and step learning-rate decay.

use ndarray::Array2;
use std::collections::HashMap;

use crate::network::FeedForward;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgdConfig {
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
}

/// SGD over a fixed group of parameters, chosen when the optimizer is built.
///
/// Update per parameter: `v = momentum * v + (g + weight_decay * w)`, then
/// `w -= lr * v`. The first step seeds `v` with the raw direction.
#[derive(Debug, Clone)]
pub struct Sgd {
    config: SgdConfig,
    group: Vec<String>,
    velocities: HashMap<String, Array2<f64>>,
}

impl Sgd {
    /// Builds the parameter group from the currently trainable parameters.
    pub fn new(network: &FeedForward, config: SgdConfig) -> Sgd {
        Sgd {
            config,
            group: network.trainable_names(),
            velocities: HashMap::new(),
        }
    }

    pub fn group(&self) -> &[String] {
        &self.group
    }

    pub fn lr(&self) -> f64 {
        self.config.learning_rate
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.config.learning_rate = lr;
    }

    pub fn step(&mut self, network: &mut FeedForward) {
        let SgdConfig {
            learning_rate,
            momentum,
            weight_decay,
        } = self.config;

        for name in self.group.iter() {
            let param = match network.param_mut(name) {
                Some(p) => p,
                None => continue,
            };

            let grad = match &param.grad {
                Some(g) if param.trainable => g,
                _ => continue,
            };

            let mut direction = grad.clone();
            if weight_decay != 0. {
                direction.scaled_add(weight_decay, &param.data);
            }

            if momentum != 0. {
                direction = match self.velocities.remove(name) {
                    Some(mut velocity) => {
                        velocity *= momentum;
                        velocity += &direction;
                        velocity
                    }
                    None => direction,
                };
                self.velocities.insert(name.clone(), direction.clone());
            }

            param.data.scaled_add(-learning_rate, &direction);
        }
    }
}

/// Multiplies the learning rate by `drop` every `every` epochs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDecay {
    lr: f64,
    drop: f64,
    every: usize,
}

impl StepDecay {
    pub fn new(initial_lr: f64, drop: f64, every: usize) -> StepDecay {
        StepDecay {
            lr: initial_lr,
            drop,
            every,
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Called before epoch `epoch` (0-based). Returns the new rate when it drops.
    pub fn on_epoch(&mut self, epoch: usize) -> Option<f64> {
        if self.every == 0 || (epoch + 1) % self.every != 0 {
            return None;
        }
        self.lr *= self.drop;
        Some(self.lr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn single_weight(w: f64) -> FeedForward {
        FeedForward::from_weights(vec![array![[w]]]).unwrap()
    }

    fn set_grad(net: &mut FeedForward, g: f64) {
        net.param_mut("layers.0.weight").unwrap().set_grad(array![[g]]);
        net.param_mut("layers.0.bias").unwrap().zero_grad();
    }

    fn weight(net: &FeedForward) -> f64 {
        net.param("layers.0.weight").unwrap().data[[0, 0]]
    }

    #[test]
    fn plain_step() {
        let mut net = single_weight(1.0);
        let mut sgd = Sgd::new(
            &net,
            SgdConfig {
                learning_rate: 0.1,
                momentum: 0.,
                weight_decay: 0.,
            },
        );
        set_grad(&mut net, 2.0);
        sgd.step(&mut net);
        assert!((weight(&net) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn momentum_accumulates() {
        let mut net = single_weight(0.0);
        let mut sgd = Sgd::new(
            &net,
            SgdConfig {
                learning_rate: 1.0,
                momentum: 0.9,
                weight_decay: 0.,
            },
        );

        set_grad(&mut net, 1.0);
        sgd.step(&mut net);
        assert!((weight(&net) + 1.0).abs() < 1e-12);

        set_grad(&mut net, 1.0);
        sgd.step(&mut net);
        // v = 0.9 * 1 + 1
        assert!((weight(&net) + 2.9).abs() < 1e-12);
    }

    #[test]
    fn weight_decay_joins_the_direction() {
        let mut net = single_weight(2.0);
        let mut sgd = Sgd::new(
            &net,
            SgdConfig {
                learning_rate: 0.5,
                momentum: 0.,
                weight_decay: 0.1,
            },
        );
        set_grad(&mut net, 0.0);
        sgd.step(&mut net);
        assert!((weight(&net) - 1.9).abs() < 1e-12);
    }

    #[test]
    fn group_is_fixed_at_construction() {
        let mut net = FeedForward::from_weights(vec![array![[1.0]], array![[1.0]]]).unwrap();
        net.freeze_all_but_output();
        let mut sgd = Sgd::new(
            &net,
            SgdConfig {
                learning_rate: 1.0,
                momentum: 0.,
                weight_decay: 0.,
            },
        );
        assert_eq!(sgd.group(), ["layers.1.weight", "layers.1.bias"]);

        // a gradient on a parameter outside the group is ignored
        net.set_trainable(true);
        net.param_mut("layers.0.weight").unwrap().set_grad(array![[1.0]]);
        sgd.step(&mut net);
        assert_eq!(net.param("layers.0.weight").unwrap().data[[0, 0]], 1.0);
    }

    #[test]
    fn step_decay_drops_on_schedule() {
        let mut decay = StepDecay::new(0.01, 0.5, 20);
        let drops = (0..60)
            .filter_map(|epoch| decay.on_epoch(epoch).map(|lr| (epoch, lr)))
            .collect::<Vec<(usize, f64)>>();

        assert_eq!(drops.len(), 3);
        assert_eq!(drops[0].0, 19);
        assert_eq!(drops[1].0, 39);
        assert!((decay.lr() - 0.00125).abs() < 1e-15);
    }

    #[test]
    fn zero_interval_never_decays() {
        let mut decay = StepDecay::new(0.1, 0.5, 0);
        assert!((0..10).all(|e| decay.on_epoch(e).is_none()));
    }
}
