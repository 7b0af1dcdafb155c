//! Held-out quality metrics for both model heads.

use crate::error::{PipelineError, Result};
use crate::model::DelayModel;
use ndarray::{Array1, ArrayView1, ArrayView2};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub probabilities: Array1<f64>,
    pub delays: Array1<f64>,
    pub auc: f64,
    pub mae: f64,
}

/// Area under the ROC curve via the rank-sum statistic, averaging ranks
/// across tied scores.
///
/// Fails with [`PipelineError::DegenerateLabel`] when only one class is
/// present, since the curve is undefined.
pub fn roc_auc(labels: ArrayView1<f64>, scores: ArrayView1<f64>) -> Result<f64> {
    let positives = labels.iter().filter(|&&y| y > 0.5).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        let class = if positives == 0 { 0 } else { 1 };
        return Err(PipelineError::DegenerateLabel { class });
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; tied block i..=j shares the mean rank
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] > 0.5 {
                positive_rank_sum += rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

pub fn mean_absolute_error(truth: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    truth
        .iter()
        .zip(predicted.iter())
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / truth.len() as f64
}

/// Scores a trained model on the validation partition.
#[tracing::instrument(skip_all, fields(rows = x_val.nrows()))]
pub fn evaluate(
    model: &DelayModel,
    x_val: ArrayView2<f64>,
    y_cls_val: ArrayView1<f64>,
    y_reg_val: ArrayView1<f64>,
) -> Result<Evaluation> {
    let preds = model.predict(x_val)?;
    let auc = roc_auc(y_cls_val, preds.probability.view())?;
    let mae = mean_absolute_error(y_reg_val, preds.delay.view());

    info!(
        auc = %format!("{:.4}", auc),
        mae_minutes = %format!("{:.2}", mae),
        "Evaluated model"
    );

    Ok(Evaluation {
        probabilities: preds.probability,
        delays: preds.delay,
        auc,
        mae,
    })
}
