//! Shared machinery for the attack adapters: loss functions, SPSA
//! gradient estimation, and ball sampling.

use gauntlet_core::{argmax_rows, GauntletError, Model, Norm, Result};
use ndarray::{Array2, ArrayD, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Loss variant for the gradient attack.
///
/// Selectable between invocations without reconstructing the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackLoss {
    /// Cross-entropy of the scores against the true label. Ascending this
    /// loss drives the correct-class probability down.
    CrossEntropy,
    /// Margin between the true class and the strongest other class,
    /// normalized by the spread of the top scores so the objective is
    /// invariant to score rescaling.
    MarginRatio,
}

/// Validate that labels match the batch's leading axis.
pub(crate) fn check_batch(x: &ArrayD<f32>, y: &[usize]) -> Result<()> {
    let rows = x.shape().first().copied().unwrap_or(0);
    if rows != y.len() {
        return Err(GauntletError::ShapeMismatch {
            expected: vec![rows],
            got: vec![y.len()],
        });
    }
    Ok(())
}

/// log(sum(exp(row))) with the usual max-shift for stability.
fn log_sum_exp(row: &[f32]) -> f32 {
    let m = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    m + row.iter().map(|v| (v - m).exp()).sum::<f32>().ln()
}

/// Strongest class other than `skip` in a score row.
fn best_other(row: &[f32], skip: usize) -> usize {
    let mut best = usize::MAX;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in row.iter().enumerate() {
        if i != skip && v > best_val {
            best_val = v;
            best = i;
        }
    }
    best
}

/// Runner-up class per sample: the strongest class that is not the true
/// label, read off the clean scores. Used as the target of the targeted
/// stages.
pub(crate) fn runner_up_classes(scores: &Array2<f32>, labels: &[usize]) -> Vec<usize> {
    scores
        .axis_iter(Axis(0))
        .zip(labels)
        .map(|(row, &y)| best_other(&row.to_vec(), y))
        .collect()
}

/// Per-sample attack objective. Larger is better for the attacker.
///
/// With `targets` present the objective pulls toward the target class;
/// otherwise it pushes away from the true class.
pub(crate) fn batch_loss(
    scores: &Array2<f32>,
    labels: &[usize],
    targets: Option<&[usize]>,
    loss: AttackLoss,
) -> Vec<f32> {
    scores
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(i, row)| {
            let row = row.to_vec();
            let y = labels[i];
            match (loss, targets) {
                (AttackLoss::CrossEntropy, None) => log_sum_exp(&row) - row[y],
                (AttackLoss::CrossEntropy, Some(t)) => row[t[i]] - log_sum_exp(&row),
                (AttackLoss::MarginRatio, maybe_t) => {
                    let rival = match maybe_t {
                        Some(t) => t[i],
                        None => best_other(&row, y),
                    };
                    let mut sorted = row.clone();
                    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
                    let spread = sorted[0] - sorted[sorted.len().min(3) - 1] + 1e-12;
                    (row[rival] - row[y]) / spread
                }
            }
        })
        .collect()
}

/// Which samples the scores misclassify.
pub(crate) fn broken_mask(scores: &Array2<f32>, labels: &[usize]) -> Vec<bool> {
    argmax_rows(scores)
        .iter()
        .zip(labels)
        .map(|(&p, &y)| p != y)
        .collect()
}

/// SPSA two-point gradient estimate of an arbitrary per-sample loss.
///
/// Draws a single Bernoulli ±1 probe direction for the whole batch and
/// evaluates the model twice, independent of input dimension. The
/// per-sample gradient estimate is the probe row scaled by the loss
/// difference.
pub(crate) fn spsa_gradient_with<F>(
    model: &dyn Model,
    x: &ArrayD<f32>,
    delta: f32,
    rng: &mut StdRng,
    loss_of: F,
) -> Result<ArrayD<f32>>
where
    F: Fn(&Array2<f32>) -> Vec<f32>,
{
    let mut probe = ArrayD::<f32>::zeros(x.raw_dim());
    for v in probe.iter_mut() {
        *v = if rng.random::<bool>() { 1.0 } else { -1.0 };
    }

    let plus = x + &(&probe * delta);
    let minus = x - &(&probe * delta);
    let loss_plus = loss_of(&model.predict(&plus)?);
    let loss_minus = loss_of(&model.predict(&minus)?);

    let mut grad = probe;
    for (i, mut row) in grad.axis_iter_mut(Axis(0)).enumerate() {
        let scale = (loss_plus[i] - loss_minus[i]) / (2.0 * delta);
        row.mapv_inplace(|v| v * scale);
    }
    Ok(grad)
}

/// Random point inside the eps-ball around each row of `origin`.
pub(crate) fn sample_in_ball(
    origin: &ArrayD<f32>,
    norm: Norm,
    eps: f32,
    rng: &mut StdRng,
) -> ArrayD<f32> {
    let mut out = origin.clone();
    for v in out.iter_mut() {
        *v += rng.random_range(-eps..=eps);
    }
    // Cube sampling covers the sup-norm ball exactly; for the Euclidean
    // ball the projection pulls outliers onto the sphere.
    norm.project_batch(&out, origin, eps)
}

/// Step `x` along the ascent direction for the given norm: sign steps for
/// the sup-norm, 2-normalized rows for the Euclidean norm.
pub(crate) fn ascent_step(x: &mut ArrayD<f32>, grad: &ArrayD<f32>, norm: Norm, step: f32) {
    match norm {
        Norm::Linf => {
            for (v, g) in x.iter_mut().zip(grad.iter()) {
                *v += step * g.signum();
            }
        }
        Norm::L2 => {
            for (mut row, grow) in x.axis_iter_mut(Axis(0)).zip(grad.axis_iter(Axis(0))) {
                let nrm = grow.iter().map(|g| g * g).sum::<f32>().sqrt();
                if nrm > 1e-12 {
                    for (v, g) in row.iter_mut().zip(grow.iter()) {
                        *v += step * g / nrm;
                    }
                }
            }
        }
    }
}
