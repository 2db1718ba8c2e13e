//! Per-parameter gradient interception.
//!
//! A hook sees the raw gradient of its parameter after every backward pass and
//! returns the gradient the optimizer will actually consume. Hooks stay attached
//! until removed through the handle returned at registration.

use ndarray::Array2;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(1);

pub trait GradientHook: Send + Sync {
    fn intercept(&self, grad: &Array2<f64>) -> Array2<f64>;
}

impl<F> GradientHook for F
where
    F: Fn(&Array2<f64>) -> Array2<f64> + Send + Sync,
{
    fn intercept(&self, grad: &Array2<f64>) -> Array2<f64> {
        self(grad)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Detach ticket for a registered hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookHandle {
    pub param: String,
    pub id: HookId,
}

#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<(HookId, Arc<dyn GradientHook>)>,
}

impl HookRegistry {
    pub fn register(&mut self, hook: Arc<dyn GradientHook>) -> HookId {
        let id = HookId(NEXT_HOOK_ID.fetch_add(1, Ordering::Relaxed));
        self.hooks.push((id, hook));
        id
    }

    pub fn remove(&mut self, id: HookId) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(hook_id, _)| *hook_id != id);
        self.hooks.len() != before
    }

    /// Runs every hook in registration order.
    pub fn apply(&self, grad: Array2<f64>) -> Array2<f64> {
        self.hooks
            .iter()
            .fold(grad, |grad, (_, hook)| hook.intercept(&grad))
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|(id, _)| id))
            .finish()
    }
}

/// Zeroes whole rows and columns of a weight gradient.
///
/// Rows index the downstream neurons of the weight matrix and columns the
/// upstream ones, so a masked row freezes every connection leaving a foreign
/// neuron in the reverse traversal, and a masked column freezes every
/// connection reaching an unselected neuron.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradientMask {
    rows: Vec<usize>,
    cols: Vec<usize>,
}

impl GradientMask {
    /// `true` entries of either mask are the indices that get zeroed.
    pub fn new(row_mask: &[bool], col_mask: &[bool]) -> GradientMask {
        GradientMask {
            rows: Self::indices(row_mask),
            cols: Self::indices(col_mask),
        }
    }

    pub fn from_indices(rows: Vec<usize>, cols: Vec<usize>) -> GradientMask {
        GradientMask { rows, cols }
    }

    fn indices(mask: &[bool]) -> Vec<usize> {
        mask.iter()
            .enumerate()
            .filter(|(_, masked)| **masked)
            .map(|(ix, _)| ix)
            .collect()
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    /// Whether every masked index lies inside a gradient of `shape`.
    pub fn fits(&self, shape: (usize, usize)) -> bool {
        let (n_rows, n_cols) = shape;
        self.rows.iter().all(|r| *r < n_rows) && self.cols.iter().all(|c| *c < n_cols)
    }

    /// Panics if an index falls outside `grad`; check with `fits` before registering.
    pub fn apply(&self, grad: &Array2<f64>) -> Array2<f64> {
        let mut masked = grad.clone();

        for row in self.rows.iter() {
            masked.row_mut(*row).fill(0.);
        }
        for col in self.cols.iter() {
            masked.column_mut(*col).fill(0.);
        }

        masked
    }
}

impl GradientHook for GradientMask {
    fn intercept(&self, grad: &Array2<f64>) -> Array2<f64> {
        self.apply(grad)
    }
}
