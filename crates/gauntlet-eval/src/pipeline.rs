//! Per-stage pipeline engine.
//!
//! `run_stage` is the reusable unit the orchestrator is built from: it
//! recomputes the active index list from the tracker, chunks it in order,
//! gathers rank-stable sub-batches, re-seeds the adapter, invokes the
//! perturb contract, and merges the result back through the tracker.
//! Anything implementing [`Attack`] can be driven through it.
//!
//! Stages must run strictly sequentially: each stage's active set depends
//! on the previous stage's outcome. Sub-batching exists to bound peak
//! memory, not for concurrency.

use crate::tracker::RobustnessTracker;
use gauntlet_core::{GauntletError, Model, Norm, Result};
use gauntlet_attacks::Attack;
use ndarray::{ArrayD, Axis};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// What one stage did to the working set.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    /// Stage identifier.
    pub id: String,
    /// Samples handed to the adapter (the active set size on entry).
    pub attacked: usize,
    /// Samples newly broken by this stage.
    pub newly_broken: usize,
    /// Cumulative robust accuracy after the stage.
    pub robust_accuracy: f32,
}

/// Seed source when no fixed seed is configured: wall clock, so repeated
/// invocations of the same adapter are independent draws.
pub fn wall_clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Drive one attack stage over the still-robust subset.
///
/// When the active set is empty the adapter is not invoked at all and a
/// zero-work report is returned. Otherwise the active list is chunked in
/// index order; each chunk is gathered with `select`, which preserves the
/// batch axis for every chunk size including one. The adapter is
/// re-seeded before every invocation: with the fixed `seed` when present,
/// from the wall clock otherwise.
///
/// `verbose` gates progress logging only; the report and all tracker
/// state are identical either way.
#[allow(clippy::too_many_arguments)]
pub fn run_stage(
    model: &dyn Model,
    x: &ArrayD<f32>,
    y: &[usize],
    stage_id: &str,
    attack: &mut dyn Attack,
    tracker: &mut RobustnessTracker,
    batch_size: usize,
    seed: Option<u64>,
    verbose: bool,
) -> Result<StageReport> {
    if batch_size == 0 {
        return Err(GauntletError::InvalidConfig(
            "batch size must be positive".into(),
        ));
    }

    let active = tracker.active_indices();
    if active.is_empty() {
        return Ok(StageReport {
            id: stage_id.to_string(),
            attacked: 0,
            newly_broken: 0,
            robust_accuracy: tracker.robust_accuracy(),
        });
    }

    let n_batches = active.len().div_ceil(batch_size);
    let mut newly_broken = 0;
    for (batch_idx, chunk) in active.chunks(batch_size).enumerate() {
        let xb = x.select(Axis(0), chunk);
        let yb: Vec<usize> = chunk.iter().map(|&i| y[i]).collect();

        attack.set_seed(seed.unwrap_or_else(wall_clock_seed));
        let perturbed = attack.perturb(model, &xb, &yb)?;
        if perturbed.shape() != xb.shape() {
            return Err(GauntletError::ShapeMismatch {
                expected: xb.shape().to_vec(),
                got: perturbed.shape().to_vec(),
            });
        }

        let broke = tracker.apply_stage_result(model, chunk, &perturbed, y, batch_size)?;
        newly_broken += broke;
        if verbose {
            info!(
                stage = stage_id,
                batch = batch_idx + 1,
                of = n_batches,
                broke,
                out_of = chunk.len(),
                "sub-batch done"
            );
        }
    }

    let report = StageReport {
        id: stage_id.to_string(),
        attacked: active.len(),
        newly_broken,
        robust_accuracy: tracker.robust_accuracy(),
    };
    if verbose {
        info!(
            stage = stage_id,
            newly_broken = report.newly_broken,
            robust_accuracy = report.robust_accuracy,
            "stage complete"
        );
    }
    Ok(report)
}

/// Diagnostic summary of a finished adversarial tensor. Never feeds back
/// into results.
#[derive(Debug, Clone, Serialize)]
pub struct PerturbationStats {
    /// Largest per-sample distance from the originals under the norm.
    pub max_distance: f32,
    /// NaN entries in the adversarial tensor.
    pub nan_count: usize,
    pub max_value: f32,
    pub min_value: f32,
}

/// Measure the actual perturbations in `adv` against `orig`.
pub fn perturbation_stats(orig: &ArrayD<f32>, adv: &ArrayD<f32>, norm: Norm) -> PerturbationStats {
    let max_distance = norm
        .row_distances(orig, adv)
        .into_iter()
        .fold(0.0_f32, f32::max);
    PerturbationStats {
        max_distance,
        nan_count: adv.iter().filter(|v| v.is_nan()).count(),
        max_value: adv.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        min_value: adv.iter().copied().fold(f32::INFINITY, f32::min),
    }
}
