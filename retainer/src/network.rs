use ndarray::{Array2, Axis};
use ndarray_rand::{rand_distr::Uniform, RandomExt};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    error::{Error, Result},
    hook::{GradientHook, HookHandle},
    param::Parameter,
    penalty::Penalty,
};

pub fn sigmoid(x: f64) -> f64 {
    let clipped_x = f64::max(f64::min(500., x), -500.);
    1. / (1. + f64::exp(-clipped_x))
}

pub fn relu(x: f64) -> f64 {
    f64::max(x, 0.)
}

pub fn drelu(x: f64) -> f64 {
    if x > 0. {
        1.
    } else {
        0.
    }
}

/// Serializable parameter values, in enumeration order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetworkState {
    pub params: Vec<(String, Array2<f64>)>,
}

impl NetworkState {
    pub fn get(&self, name: &str) -> Option<&Array2<f64>> {
        self.params
            .iter()
            .find(|(param_name, _)| param_name == name)
            .map(|(_, data)| data)
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    /// `[fan_out x fan_in]`.
    pub weight: Parameter,
    pub bias: Parameter,
}

/// Activations recorded by a forward pass, consumed by `backward`.
#[derive(Debug, Clone)]
pub struct Trace {
    inputs: Vec<Array2<f64>>,
    pre_activations: Vec<Array2<f64>>,
    pub output: Array2<f64>,
}

/// Fully connected network: ReLU hidden layers, sigmoid outputs.
///
/// `Clone` is a deep copy, hooks included, so a snapshot never shares
/// mutable state with the network it was taken from.
#[derive(Debug, Clone)]
pub struct FeedForward {
    layers: Vec<Layer>,
}

impl FeedForward {
    pub fn new(widths: &[usize], seed: u64) -> FeedForward {
        let mut rng = StdRng::seed_from_u64(seed);

        let layers = widths
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let (d_in, d_out) = (pair[0], pair[1]);
                let bound = FeedForward::init_bound(d_in, d_out);
                let weight =
                    Array2::random_using((d_out, d_in), Uniform::new(-bound, bound), &mut rng);

                Layer {
                    weight: Parameter::new(format!("layers.{i}.weight"), weight),
                    bias: Parameter::new(format!("layers.{i}.bias"), Array2::zeros((1, d_out))),
                }
            })
            .collect::<Vec<Layer>>();

        FeedForward { layers }
    }

    /// Builds a network around explicit `[fan_out x fan_in]` weights with zero biases.
    pub fn from_weights(weights: Vec<Array2<f64>>) -> Result<FeedForward> {
        if weights.is_empty() {
            return Err(Error::Config("a network needs at least one layer".into()));
        }

        for (i, pair) in weights.windows(2).enumerate() {
            let (_, fan_in) = pair[1].dim();
            let (fan_out, _) = pair[0].dim();
            if fan_in != fan_out {
                return Err(Error::ShapeMismatch {
                    layer: i + 1,
                    detail: format!("fan_in {} does not follow fan_out {}", fan_in, fan_out),
                });
            }
        }

        let layers = weights
            .into_iter()
            .enumerate()
            .map(|(i, weight)| {
                let d_out = weight.nrows();
                Layer {
                    weight: Parameter::new(format!("layers.{i}.weight"), weight),
                    bias: Parameter::new(format!("layers.{i}.bias"), Array2::zeros((1, d_out))),
                }
            })
            .collect::<Vec<Layer>>();

        Ok(FeedForward { layers })
    }

    fn init_bound(d_in: usize, d_out: usize) -> f64 {
        f64::sqrt(6. / (d_in + d_out) as f64)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn widths(&self) -> Vec<usize> {
        let mut widths = vec![self.input_width()];
        widths.extend(self.layers.iter().map(|l| l.weight.data.nrows()));
        widths
    }

    pub fn input_width(&self) -> usize {
        self.layers.first().map(|l| l.weight.data.ncols()).unwrap_or(0)
    }

    pub fn output_width(&self) -> usize {
        self.layers.last().map(|l| l.weight.data.nrows()).unwrap_or(0)
    }

    pub fn num_params(&self) -> usize {
        self.parameters().map(|p| p.len()).sum()
    }

    /// Weights then bias, layer by layer from the input side.
    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.layers.iter().flat_map(|l| [&l.weight, &l.bias])
    }

    pub fn parameters_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        self.layers
            .iter_mut()
            .flat_map(|l| [&mut l.weight, &mut l.bias])
    }

    pub fn weights(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters().filter(|p| p.is_weight())
    }

    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.parameters().find(|p| p.name == name)
    }

    pub fn param_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.parameters_mut().find(|p| p.name == name)
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.parameters_mut().for_each(|p| p.trainable = trainable);
    }

    /// Leaves only the output layer's weight and bias trainable.
    pub fn freeze_all_but_output(&mut self) {
        let last = self.layers.len().saturating_sub(1);
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.weight.trainable = i == last;
            layer.bias.trainable = i == last;
        }
    }

    pub fn trainable_names(&self) -> Vec<String> {
        self.parameters()
            .filter(|p| p.trainable)
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn register_hook(&mut self, name: &str, hook: Arc<dyn GradientHook>) -> Result<HookHandle> {
        match self.param_mut(name) {
            Some(param) => Ok(param.register_hook(hook)),
            None => Err(Error::UnknownParameter(name.to_string())),
        }
    }

    pub fn remove_hook(&mut self, handle: &HookHandle) -> bool {
        match self.param_mut(&handle.param) {
            Some(param) => param.remove_hook(handle.id),
            None => false,
        }
    }

    pub fn hook_count(&self) -> usize {
        self.parameters().map(|p| p.hook_count()).sum()
    }

    pub fn zero_grad(&mut self) {
        self.parameters_mut().for_each(|p| p.zero_grad());
    }

    pub fn forward(&self, inputs: &Array2<f64>) -> Array2<f64> {
        self.forward_trace(inputs).output
    }

    pub fn forward_trace(&self, inputs: &Array2<f64>) -> Trace {
        let last = self.layers.len().saturating_sub(1);
        let mut layer_inputs = Vec::with_capacity(self.layers.len());
        let mut pre_activations = Vec::with_capacity(self.layers.len());

        let mut activation = inputs.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            let z = activation.dot(&layer.weight.data.t()) + &layer.bias.data;
            layer_inputs.push(activation);

            activation = if i == last {
                z.mapv(sigmoid)
            } else {
                z.mapv(relu)
            };
            pre_activations.push(z);
        }

        Trace {
            inputs: layer_inputs,
            pre_activations,
            output: activation,
        }
    }

    /// Backpropagates `grad_logits` (loss w.r.t. the output pre-activations).
    ///
    /// Trainable parameters get their gradient plus the penalty's, filtered
    /// through their hooks. Frozen parameters end with no gradient.
    pub fn backward(&mut self, trace: &Trace, grad_logits: &Array2<f64>, penalty: Option<&Penalty>) {
        let mut delta = grad_logits.clone();

        for i in (0..self.layers.len()).rev() {
            let upstream = match i {
                0 => None,
                _ => {
                    let back = delta.dot(&self.layers[i].weight.data);
                    Some(back * trace.pre_activations[i - 1].mapv(drelu))
                }
            };

            let layer = &mut self.layers[i];

            if layer.weight.trainable {
                let mut grad_w = delta.t().dot(&trace.inputs[i]);
                if let Some(extra) = penalty.and_then(|p| p.gradient(&layer.weight)) {
                    grad_w += &extra;
                }
                layer.weight.set_grad(grad_w);
            } else {
                layer.weight.zero_grad();
            }

            if layer.bias.trainable {
                let mut grad_b = delta.sum_axis(Axis(0)).insert_axis(Axis(0));
                if let Some(extra) = penalty.and_then(|p| p.gradient(&layer.bias)) {
                    grad_b += &extra;
                }
                layer.bias.set_grad(grad_b);
            } else {
                layer.bias.zero_grad();
            }

            match upstream {
                Some(d) => delta = d,
                None => break,
            }
        }
    }

    pub fn state(&self) -> NetworkState {
        NetworkState {
            params: self
                .parameters()
                .map(|p| (p.name.clone(), p.data.clone()))
                .collect(),
        }
    }

    /// Overwrites parameter values. Hooks and trainability are left alone.
    pub fn load_state(&mut self, state: &NetworkState) -> Result<()> {
        let n_params = self.parameters().count();
        if state.params.len() != n_params {
            return Err(Error::ShapeMismatch {
                layer: 0,
                detail: format!(
                    "state holds {} tensors, network has {}",
                    state.params.len(),
                    n_params
                ),
            });
        }

        for (i, (param, (name, data))) in self
            .parameters()
            .zip(state.params.iter())
            .enumerate()
        {
            if param.name != *name || param.shape() != data.dim() {
                return Err(Error::ShapeMismatch {
                    layer: i / 2,
                    detail: format!(
                        "{} {:?} cannot load {} {:?}",
                        param.name,
                        param.shape(),
                        name,
                        data.dim()
                    ),
                });
            }
        }

        for (param, (_, data)) in self.parameters_mut().zip(state.params.iter()) {
            param.data.assign(data);
        }

        Ok(())
    }
}
