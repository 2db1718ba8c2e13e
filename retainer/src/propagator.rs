//! Neuron relevance propagation.
//!
//! Starting from the output unit of the task being learned, relevance walks the
//! weight matrices from the output side back to the input side. A neuron is
//! relevant when an above-threshold weight connects it to a relevant neuron of
//! the layer after it. The resulting masks are installed as gradient hooks on
//! the pre-retraining snapshot, so only the relevant subgraph can move during
//! the final fine tuning.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    error::{Error, Result},
    hook::{GradientMask, HookHandle},
    network::FeedForward,
};

/// Selected neurons at one layer boundary.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSelection {
    pub selected: usize,
    pub neurons: usize,
}

impl LayerSelection {
    /// No neuron selected: the whole boundary stays frozen.
    pub fn is_degenerate(&self) -> bool {
        self.selected == 0
    }
}

/// Masks of one weight matrix. `true` means frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerMask {
    pub param: String,
    /// Downstream neurons, indexed by weight row.
    pub row_mask: Vec<bool>,
    /// Upstream neurons, indexed by weight column.
    pub col_mask: Vec<bool>,
}

impl LayerMask {
    pub fn selection(&self) -> LayerSelection {
        let neurons = self.col_mask.len();
        LayerSelection {
            selected: neurons - self.col_mask.iter().filter(|frozen| **frozen).count(),
            neurons,
        }
    }
}

#[derive(Debug)]
pub struct NeuronSelection {
    /// Installed on the reference network; the caller detaches them.
    pub handles: Vec<HookHandle>,
    /// Output side first.
    pub masks: Vec<LayerMask>,
    /// Input side first.
    pub report: Vec<LayerSelection>,
}

/// Relevance masks of `model` for `output_unit`, output side first.
pub fn trace_relevance(model: &FeedForward, output_unit: usize, zero_threshold: f64) -> Result<Vec<LayerMask>> {
    let weights = model.weights().collect::<Vec<_>>();
    let n_outputs = model.output_width();

    if output_unit >= n_outputs {
        return Err(Error::ShapeMismatch {
            layer: weights.len().saturating_sub(1),
            detail: format!("output unit {} outside {} outputs", output_unit, n_outputs),
        });
    }

    let mut prev_active = vec![true; n_outputs];
    prev_active[output_unit] = false;

    let mut masks = Vec::with_capacity(weights.len());

    for (layer_ix, weight) in weights.iter().enumerate().rev() {
        let (x_size, y_size) = weight.shape();
        if prev_active.len() != x_size {
            return Err(Error::ShapeMismatch {
                layer: layer_ix,
                detail: format!(
                    "{} has {} rows, mask from the layer after has {}",
                    weight.name,
                    x_size,
                    prev_active.len()
                ),
            });
        }

        let mut active = vec![true; y_size];
        let data = &weight.data;

        for x in 0..x_size {
            // neurons outside the routed task never vouch for anything upstream
            if prev_active[x] {
                continue;
            }

            for y in 0..y_size {
                if data[[x, y]] > zero_threshold {
                    active[y] = false;
                }
            }
        }

        masks.push(LayerMask {
            param: weight.name.clone(),
            row_mask: prev_active,
            col_mask: active.clone(),
        });
        prev_active = active;
    }

    Ok(masks)
}

/// Both networks must enumerate the same weight shapes, pairwise.
pub fn check_pairing(model: &FeedForward, reference: &FeedForward) -> Result<()> {
    let model_weights = model.weights().collect::<Vec<_>>();
    let reference_weights = reference.weights().collect::<Vec<_>>();

    if model_weights.len() != reference_weights.len() {
        return Err(Error::ShapeMismatch {
            layer: model_weights.len().min(reference_weights.len()),
            detail: format!(
                "retrained network has {} weight matrices, snapshot has {}",
                model_weights.len(),
                reference_weights.len()
            ),
        });
    }

    for (i, (a, b)) in model_weights.iter().zip(reference_weights.iter()).enumerate() {
        if a.name != b.name || a.shape() != b.shape() {
            return Err(Error::ShapeMismatch {
                layer: i,
                detail: format!("{} {:?} vs {} {:?}", a.name, a.shape(), b.name, b.shape()),
            });
        }
    }

    Ok(())
}

/// Computes relevance on `model` and installs one mask hook per weight of `reference`.
///
/// Nothing is installed unless both networks pair up and every mask is computed.
pub fn select_neurons(
    model: &FeedForward,
    reference: &mut FeedForward,
    output_unit: usize,
    zero_threshold: f64,
) -> Result<NeuronSelection> {
    check_pairing(model, reference)?;
    let masks = trace_relevance(model, output_unit, zero_threshold)?;

    for (i, mask) in masks.iter().rev().enumerate() {
        let hook = GradientMask::new(&mask.row_mask, &mask.col_mask);
        let shape = reference.param(&mask.param).map(|p| p.shape());
        match shape {
            Some(shape)
                if shape == (mask.row_mask.len(), mask.col_mask.len()) && hook.fits(shape) => {}
            Some(shape) => {
                return Err(Error::ShapeMismatch {
                    layer: i,
                    detail: format!(
                        "mask over {} x {} does not fit {} {:?}",
                        mask.row_mask.len(),
                        mask.col_mask.len(),
                        mask.param,
                        shape
                    ),
                })
            }
            None => return Err(Error::UnknownParameter(mask.param.clone())),
        }
    }

    let mut handles = Vec::with_capacity(masks.len());
    for mask in masks.iter() {
        let hook = GradientMask::new(&mask.row_mask, &mask.col_mask);
        match reference.register_hook(&mask.param, Arc::new(hook)) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                detach(reference, &mut handles);
                return Err(e);
            }
        }
    }

    let report = masks
        .iter()
        .rev()
        .map(|m| m.selection())
        .collect::<Vec<LayerSelection>>();

    for (nr, (selection, mask)) in report.iter().zip(masks.iter().rev()).enumerate() {
        info!("layer {}: {} / {}", nr + 1, selection.selected, selection.neurons);
        if selection.is_degenerate() {
            warn!(
                "(selection) no neuron feeding {} was selected, its inputs stay frozen",
                mask.param
            );
        }
    }

    Ok(NeuronSelection {
        handles,
        masks,
        report,
    })
}

/// Removes every hook in `handles` from `network`, emptying the list.
pub fn detach(network: &mut FeedForward, handles: &mut Vec<HookHandle>) -> usize {
    handles
        .drain(..)
        .filter(|handle| network.remove_hook(handle))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    const THRESHOLD: f64 = 0.01;

    /// 3 inputs -> 4 hidden -> 2 outputs; class 1 reaches hidden 0, 2, 3.
    fn toy() -> FeedForward {
        FeedForward::from_weights(vec![
            array![
                [0.2, 0.0, 0.0],
                [0.0, 0.9, 0.0],
                [0.0, 0.0, 0.001],
                [0.0, 0.3, 0.0],
            ],
            array![[0.9, 0.9, 0.9, 0.9], [0.5, 0.005, 0.3, 0.2]],
        ])
        .unwrap()
    }

    #[test]
    fn output_row_selects_hidden_units_above_threshold() {
        let masks = trace_relevance(&toy(), 1, THRESHOLD).unwrap();
        let output = &masks[0];

        assert_eq!(output.param, "layers.1.weight");
        assert_eq!(output.row_mask, vec![true, false]);
        assert_eq!(output.col_mask, vec![false, true, false, false]);
        assert_eq!(output.selection(), LayerSelection { selected: 3, neurons: 4 });
    }

    #[test]
    fn relevance_only_flows_through_selected_rows() {
        let masks = trace_relevance(&toy(), 1, THRESHOLD).unwrap();
        let first = &masks[1];

        // hidden 1 is frozen, so its 0.9 to input 1 is not examined;
        // hidden 3 reaches input 1 with 0.3, hidden 2's 0.001 is below threshold
        assert_eq!(first.row_mask, vec![false, true, false, false]);
        assert_eq!(first.col_mask, vec![false, false, true]);
    }

    #[test]
    fn masks_match_layer_widths() {
        let net = FeedForward::new(&[7, 5, 6, 3], 4);
        let masks = trace_relevance(&net, 2, THRESHOLD).unwrap();
        let widths = net.widths();

        assert_eq!(masks.len(), 3);
        for (i, mask) in masks.iter().enumerate() {
            let layer = widths.len() - 2 - i;
            assert_eq!(mask.row_mask.len(), widths[layer + 1]);
            assert_eq!(mask.col_mask.len(), widths[layer]);
        }
        for pair in masks.windows(2) {
            assert_eq!(pair[0].col_mask, pair[1].row_mask);
        }
    }

    #[test]
    fn below_threshold_layer_selects_nothing() {
        let net = FeedForward::from_weights(vec![
            Array2::from_elem((3, 2), 0.5),
            Array2::from_elem((2, 3), THRESHOLD),
        ])
        .unwrap();

        let masks = trace_relevance(&net, 0, THRESHOLD).unwrap();
        assert!(masks[0].col_mask.iter().all(|frozen| *frozen));
        assert!(masks[0].selection().is_degenerate());
        // nothing downstream is relevant, so nothing upstream can be either
        assert!(masks[1].col_mask.iter().all(|frozen| *frozen));
    }

    #[test]
    fn fully_selected_layer_examines_every_row() {
        let net = FeedForward::from_weights(vec![
            array![[0.0, 0.2, 0.0], [0.9, 0.0, 0.0], [0.0, 0.0, 0.3]],
            array![[0.5, 0.0, 0.0], [0.0, 0.0, 0.7]],
            array![[0.0, 0.0], [0.4, 0.6]],
        ])
        .unwrap();

        let masks = trace_relevance(&net, 1, THRESHOLD).unwrap();
        assert_eq!(masks[0].col_mask, vec![false, false]);

        // both rows are open, each contributes one upstream unit
        assert_eq!(masks[1].row_mask, vec![false, false]);
        assert_eq!(masks[1].col_mask, vec![false, true, false]);

        assert_eq!(masks[2].row_mask, vec![false, true, false]);
        assert_eq!(masks[2].col_mask, vec![true, false, false]);
    }

    #[test]
    fn single_strong_weight_selects_one_unit() {
        let net = FeedForward::from_weights(vec![array![
            [0.9, 0.9, 0.9, 0.9, 0.9],
            [0.0, -0.4, 0.02, 0.01, 0.0],
        ]])
        .unwrap();

        let masks = trace_relevance(&net, 1, THRESHOLD).unwrap();
        assert_eq!(masks[0].col_mask, vec![true, true, false, true, true]);
    }

    #[test]
    fn negative_weights_are_not_relevant() {
        let net = FeedForward::from_weights(vec![array![[-0.8, 0.8]]]).unwrap();
        let masks = trace_relevance(&net, 0, THRESHOLD).unwrap();
        assert_eq!(masks[0].col_mask, vec![true, false]);
    }

    #[test]
    fn selection_is_idempotent() {
        let model = FeedForward::new(&[6, 8, 4], 9);
        let mut ref_a = model.clone();
        let mut ref_b = model.clone();

        let a = select_neurons(&model, &mut ref_a, 3, THRESHOLD).unwrap();
        let b = select_neurons(&model, &mut ref_b, 3, THRESHOLD).unwrap();
        assert_eq!(a.masks, b.masks);
        assert_eq!(a.report, b.report);

        let hooks_a = a
            .masks
            .iter()
            .map(|m| GradientMask::new(&m.row_mask, &m.col_mask))
            .collect::<Vec<_>>();
        let hooks_b = b
            .masks
            .iter()
            .map(|m| GradientMask::new(&m.row_mask, &m.col_mask))
            .collect::<Vec<_>>();
        assert_eq!(hooks_a, hooks_b);
    }

    #[test]
    fn hooks_land_on_the_reference_only() {
        let model = toy();
        let mut reference = toy();

        let mut selection = select_neurons(&model, &mut reference, 1, THRESHOLD).unwrap();
        assert_eq!(selection.handles.len(), 2);
        assert_eq!(reference.hook_count(), 2);
        assert_eq!(model.hook_count(), 0);
        assert_eq!(
            selection.report,
            vec![
                LayerSelection { selected: 2, neurons: 3 },
                LayerSelection { selected: 3, neurons: 4 },
            ]
        );

        assert_eq!(detach(&mut reference, &mut selection.handles), 2);
        assert!(selection.handles.is_empty());
        assert_eq!(reference.hook_count(), 0);
    }

    #[test]
    fn mismatched_snapshot_aborts_without_hooks() {
        let model = toy();
        let mut reference = FeedForward::new(&[3, 5, 2], 1);

        let res = select_neurons(&model, &mut reference, 1, THRESHOLD);
        assert!(matches!(res, Err(Error::ShapeMismatch { layer: 0, .. })));
        assert_eq!(reference.hook_count(), 0);

        let mut shallow = FeedForward::new(&[3, 2], 1);
        assert!(matches!(
            select_neurons(&model, &mut shallow, 1, THRESHOLD),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn unknown_output_unit_is_rejected() {
        assert!(matches!(
            trace_relevance(&toy(), 2, THRESHOLD),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
