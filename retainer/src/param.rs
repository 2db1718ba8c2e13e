use ndarray::Array2;
use std::sync::Arc;

use crate::hook::{GradientHook, HookHandle, HookId, HookRegistry};

/// A named tensor of the network. Biases are stored as `1 x n` rows.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub data: Array2<f64>,
    pub grad: Option<Array2<f64>>,
    /// Frozen parameters receive no gradient and are skipped by the optimizer.
    pub trainable: bool,
    hooks: HookRegistry,
}

impl Parameter {
    pub fn new(name: impl Into<String>, data: Array2<f64>) -> Parameter {
        Parameter {
            name: name.into(),
            data,
            grad: None,
            trainable: true,
            hooks: HookRegistry::default(),
        }
    }

    pub fn is_weight(&self) -> bool {
        !self.name.contains("bias")
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn register_hook(&mut self, hook: Arc<dyn GradientHook>) -> HookHandle {
        HookHandle {
            param: self.name.clone(),
            id: self.hooks.register(hook),
        }
    }

    pub fn remove_hook(&mut self, id: HookId) -> bool {
        self.hooks.remove(id)
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Stores `raw` as this parameter's gradient after it passes every hook.
    pub fn set_grad(&mut self, raw: Array2<f64>) {
        if !self.trainable {
            self.grad = None;
            return;
        }
        self.grad = Some(self.hooks.apply(raw));
    }

    pub fn zero_grad(&mut self) {
        self.grad = None;
    }
}
