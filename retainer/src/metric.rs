use log::warn;

use crate::{
    data::BatchSource,
    error::{Error, Result},
    network::FeedForward,
};

/// Area under the ROC curve from the rank-sum statistic, ties sharing ranks.
/// `None` when either label is absent.
pub fn auroc(scores: &[f64], positives: &[bool]) -> Option<f64> {
    let n_pos = positives.iter().filter(|p| **p).count();
    let n_neg = positives.len() - n_pos;
    if n_pos == 0 || n_neg == 0 || scores.len() != positives.len() {
        return None;
    }

    let mut order = (0..scores.len()).collect::<Vec<usize>>();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

    let mut ranks = vec![0.; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; a tie group shares the mean of its positions
        let shared = (start + end + 1) as f64 / 2.;
        for ix in order[start..end].iter() {
            ranks[*ix] = shared;
        }
        start = end;
    }

    let pos_rank_sum = ranks
        .iter()
        .zip(positives.iter())
        .filter(|(_, p)| **p)
        .map(|(r, _)| *r)
        .sum::<f64>();

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((pos_rank_sum - n_pos * (n_pos + 1.) / 2.) / (n_pos * n_neg))
}

/// Mean one-vs-rest AUROC over the classes learned so far.
pub fn avg_auroc(network: &FeedForward, test: &dyn BatchSource, learned: &[usize]) -> Result<f64> {
    let mut scores: Vec<Vec<f64>> = vec![vec![]; learned.len()];
    let mut labels: Vec<Vec<bool>> = vec![vec![]; learned.len()];

    for batch in test.batches() {
        let output = network.forward(&batch.inputs);
        for (i, cls) in learned.iter().enumerate() {
            if *cls >= output.ncols() || *cls >= batch.targets.ncols() {
                return Err(Error::Metric(format!("class {} has no output column", cls)));
            }
            scores[i].extend(output.column(*cls).iter());
            labels[i].extend(batch.targets.column(*cls).iter().map(|t| *t > 0.5));
        }
    }

    let per_class = learned
        .iter()
        .enumerate()
        .filter_map(|(i, cls)| match auroc(&scores[i], &labels[i]) {
            Some(a) => Some(a),
            None => {
                warn!("class {} has a single label in the test set, skipped", cls);
                None
            }
        })
        .collect::<Vec<f64>>();

    if per_class.is_empty() {
        return Err(Error::Metric(format!(
            "no class among {:?} has both labels in the test set",
            learned
        )));
    }

    Ok(per_class.iter().sum::<f64>() / per_class.len() as f64)
}
