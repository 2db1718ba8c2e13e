use ndarray::Array2;

use crate::{
    network::{FeedForward, NetworkState},
    param::Parameter,
};

/// Auxiliary loss term added to the task loss before backpropagation.
#[derive(Debug, Clone)]
pub enum Penalty {
    /// `coeff * sum |w|` over trainable parameters.
    L1 { coeff: f64 },
    /// `coeff * sum (w - w_ref)^2` against a frozen earlier solution.
    L2 { coeff: f64, reference: NetworkState },
}

fn sign(x: f64) -> f64 {
    if x > 0. {
        1.
    } else if x < 0. {
        -1.
    } else {
        0.
    }
}

impl Penalty {
    pub fn l1(coeff: f64) -> Penalty {
        Penalty::L1 { coeff }
    }

    pub fn l2(coeff: f64, reference: &FeedForward) -> Penalty {
        Penalty::L2 {
            coeff,
            reference: reference.state(),
        }
    }

    pub fn value(&self, network: &FeedForward) -> f64 {
        match self {
            Penalty::L1 { coeff } => {
                coeff
                    * network
                        .parameters()
                        .filter(|p| p.trainable)
                        .map(|p| p.data.iter().map(|w| w.abs()).sum::<f64>())
                        .sum::<f64>()
            }
            Penalty::L2 { coeff, reference } => {
                coeff
                    * network
                        .parameters()
                        .filter_map(|p| reference.get(&p.name).map(|r| (p, r)))
                        .map(|(p, r)| {
                            p.data
                                .iter()
                                .zip(r.iter())
                                .map(|(w, w_ref)| (w - w_ref).powi(2))
                                .sum::<f64>()
                        })
                        .sum::<f64>()
            }
        }
    }

    /// Gradient of the penalty w.r.t. one parameter, if it contributes.
    pub fn gradient(&self, param: &Parameter) -> Option<Array2<f64>> {
        match self {
            Penalty::L1 { coeff } => {
                if !param.trainable {
                    return None;
                }
                Some(param.data.mapv(|w| coeff * sign(w)))
            }
            Penalty::L2 { coeff, reference } => {
                let r = reference.get(&param.name)?;
                if r.dim() != param.data.dim() {
                    return None;
                }
                Some((&param.data - r) * (2. * coeff))
            }
        }
    }
}
