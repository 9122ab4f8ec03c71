//! Per-sample robustness state.
//!
//! The tracker owns the two pieces of shared mutable state in an
//! evaluation: the robust flags and the adversarial-example tensor. Flags
//! only ever clear (a broken sample is never resurrected), and a sample's
//! adversarial row is written exactly once, at the moment its flag
//! clears. While a flag is set, the corresponding adversarial row equals
//! the original input.

use crate::probe::correct_flags;
use gauntlet_core::{GauntletError, Model, Result};
use ndarray::{ArrayD, Axis};
use tracing::debug;

/// Robust/broken state plus the best-known adversarial example per
/// sample, for one evaluation run.
pub struct RobustnessTracker {
    flags: Vec<bool>,
    adversarial: ArrayD<f32>,
}

impl RobustnessTracker {
    /// Run the clean-accuracy probe over the full set. Samples the model
    /// already misclassifies start broken and are excluded from every
    /// stage; their adversarial rows stay the clean originals.
    pub fn initialize(
        model: &dyn Model,
        x: &ArrayD<f32>,
        y: &[usize],
        batch_size: usize,
    ) -> Result<Self> {
        let n = x.shape().first().copied().unwrap_or(0);
        if n == 0 {
            return Err(GauntletError::InvalidConfig("empty sample set".into()));
        }
        let flags = correct_flags(model, x, y, batch_size)?;
        debug!(
            total = n,
            clean_correct = flags.iter().filter(|&&f| f).count(),
            "tracker initialized"
        );
        Ok(Self {
            flags,
            adversarial: x.clone(),
        })
    }

    /// Ordered indices of still-robust samples. This list is the only
    /// set any stage is allowed to touch.
    pub fn active_indices(&self) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter_map(|(i, &f)| f.then_some(i))
            .collect()
    }

    /// Merge one attack invocation's output back into global state.
    ///
    /// Probes `perturbed` against the true labels of `indices`; every
    /// index the probe reports wrong is flipped to broken and its
    /// adversarial row overwritten with the perturbed row. Indices still
    /// classified correctly are left untouched. Returns the count of
    /// newly broken samples.
    pub fn apply_stage_result(
        &mut self,
        model: &dyn Model,
        indices: &[usize],
        perturbed: &ArrayD<f32>,
        y: &[usize],
        batch_size: usize,
    ) -> Result<usize> {
        let labels: Vec<usize> = indices.iter().map(|&i| y[i]).collect();
        if perturbed.shape().first().copied().unwrap_or(0) != indices.len() {
            return Err(GauntletError::ShapeMismatch {
                expected: vec![indices.len()],
                got: vec![perturbed.shape().first().copied().unwrap_or(0)],
            });
        }

        let still_correct = correct_flags(model, perturbed, &labels, batch_size)?;
        let mut newly_broken = 0;
        for (k, &i) in indices.iter().enumerate() {
            debug_assert!(self.flags[i], "stage touched an already-broken sample");
            if !still_correct[k] {
                self.flags[i] = false;
                self.adversarial
                    .index_axis_mut(Axis(0), i)
                    .assign(&perturbed.index_axis(Axis(0), k));
                newly_broken += 1;
            }
        }
        Ok(newly_broken)
    }

    /// Count of never-yet-broken samples.
    #[inline]
    pub fn robust_count(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }

    /// Robust accuracy over the full set, clean misclassifications
    /// included in the denominator.
    #[inline]
    pub fn robust_accuracy(&self) -> f32 {
        self.robust_count() as f32 / self.flags.len() as f32
    }

    #[inline]
    pub fn flags(&self) -> &[bool] {
        &self.flags
    }

    #[inline]
    pub fn adversarial(&self) -> &ArrayD<f32> {
        &self.adversarial
    }

    /// Consume the tracker, yielding the adversarial tensor.
    pub fn into_adversarial(self) -> ArrayD<f32> {
        self.adversarial
    }
}
