//! Decision-boundary projection attack.
//!
//! Instead of ascending a loss, this attack walks each sample onto the
//! estimated decision boundary: it measures the margin between the true
//! class and a rival class, estimates the margin gradient, and takes a
//! Newton-style step onto the hyperplane where the margin vanishes, with
//! a small overshoot so the step actually crosses. Once a sample is
//! misclassified the iterate is pulled back toward the original input,
//! so the kept candidate is the closest successful perturbation seen.

use crate::common::{check_batch, runner_up_classes, sample_in_ball, spsa_gradient_with};
use crate::Attack;
use gauntlet_core::{argmax_rows, Model, Norm, Result};
use ndarray::{Array2, ArrayD, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Configuration for the boundary-projection attack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryConfig {
    /// Independent restarts per invocation; the closest success wins.
    pub n_restarts: usize,
    /// Projection steps per restart.
    pub n_iters: usize,
    /// Multiplier applied to the boundary step so it crosses instead of
    /// landing exactly on the hyperplane.
    pub overshoot: f32,
    /// Fraction of the gap to the original input recovered after each
    /// successful step.
    pub pullback: f32,
    /// Probe magnitude for SPSA gradient estimation.
    pub spsa_delta: f32,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            n_restarts: 5,
            n_iters: 50,
            overshoot: 1.1,
            pullback: 0.1,
            spsa_delta: 1e-3,
        }
    }
}

/// Boundary-projection attack adapter.
pub struct BoundaryAttack {
    config: BoundaryConfig,
    norm: Norm,
    eps: f32,
    targeted: bool,
    seed: u64,
}

impl BoundaryAttack {
    pub fn new(norm: Norm, eps: f32, config: BoundaryConfig) -> Self {
        Self {
            config,
            norm,
            eps,
            targeted: false,
            seed: 0,
        }
    }

    /// Toggle targeted mode: the rival class becomes each sample's clean
    /// runner-up instead of the currently strongest wrong class.
    pub fn set_targeted(&mut self, targeted: bool) {
        self.targeted = targeted;
    }

    pub fn config_mut(&mut self) -> &mut BoundaryConfig {
        &mut self.config
    }

    /// Margin z_true - z_rival per sample. Negative means misclassified
    /// toward the rival.
    fn margins(scores: &Array2<f32>, y: &[usize], rivals: &[usize]) -> Vec<f32> {
        scores
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(i, row)| row[y[i]] - row[rivals[i]])
            .collect()
    }

    /// Rival class per sample for the current iterate: fixed targets in
    /// targeted mode, otherwise the strongest class other than the label.
    fn pick_rivals(scores: &Array2<f32>, y: &[usize], fixed: Option<&[usize]>) -> Vec<usize> {
        match fixed {
            Some(t) => t.to_vec(),
            None => runner_up_classes(scores, y),
        }
    }

    fn run_restart(
        &self,
        model: &dyn Model,
        x: &ArrayD<f32>,
        y: &[usize],
        fixed_rivals: Option<&[usize]>,
        restart: usize,
    ) -> Result<(ArrayD<f32>, Vec<bool>, Vec<f32>)> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(restart as u64));
        let n = x.shape()[0];

        let mut cur = if restart == 0 {
            x.clone()
        } else {
            sample_in_ball(x, self.norm, self.eps, &mut rng)
        };
        let mut best = x.clone();
        let mut best_dist = vec![f32::INFINITY; n];
        let mut found = vec![false; n];

        for _ in 0..self.config.n_iters {
            let scores = model.predict(&cur)?;
            let preds = argmax_rows(&scores);
            let rivals = Self::pick_rivals(&scores, y, fixed_rivals);
            let margins = Self::margins(&scores, y, &rivals);

            // Record successes, then pull those iterates back toward the
            // original so the next step searches for a closer crossing.
            let dists = self.norm.row_distances(x, &cur);
            for i in 0..n {
                if preds[i] != y[i] {
                    if dists[i] < best_dist[i] {
                        best_dist[i] = dists[i];
                        best.index_axis_mut(Axis(0), i)
                            .assign(&cur.index_axis(Axis(0), i));
                        found[i] = true;
                    }
                    let pull = self.config.pullback;
                    let orig = x.index_axis(Axis(0), i).to_owned();
                    let mut row = cur.index_axis_mut(Axis(0), i);
                    row.zip_mut_with(&orig, |c, o| *c += pull * (o - *c));
                }
            }

            // Newton step onto the estimated margin hyperplane for rows
            // still on the correct side.
            let grad = spsa_gradient_with(model, &cur, self.config.spsa_delta, &mut rng, |s| {
                Self::margins(s, y, &rivals)
            })?;
            for i in 0..n {
                if margins[i] <= 0.0 {
                    continue;
                }
                let grow = grad.index_axis(Axis(0), i);
                let sq: f32 = grow.iter().map(|g| g * g).sum();
                if sq <= 1e-12 {
                    continue;
                }
                let scale = self.config.overshoot * margins[i] / sq;
                let mut row = cur.index_axis_mut(Axis(0), i);
                row.zip_mut_with(&grow, |c, g| *c -= scale * g);
            }
            cur = self.norm.project_batch(&cur, x, self.eps);
        }

        // Unbroken rows report the final iterate.
        for i in 0..n {
            if !found[i] {
                best.index_axis_mut(Axis(0), i)
                    .assign(&cur.index_axis(Axis(0), i));
            }
        }
        Ok((best, found, best_dist))
    }
}

impl Attack for BoundaryAttack {
    fn name(&self) -> &'static str {
        "boundary"
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    fn perturb(&mut self, model: &dyn Model, x: &ArrayD<f32>, y: &[usize]) -> Result<ArrayD<f32>> {
        check_batch(x, y)?;
        let n = x.shape()[0];

        let fixed = if self.targeted {
            Some(runner_up_classes(&model.predict(x)?, y))
        } else {
            None
        };
        let fixed = fixed.as_deref();

        let mut out = x.clone();
        let mut out_found = vec![false; n];
        let mut out_dist = vec![f32::INFINITY; n];
        let mut any_candidate = false;

        for restart in 0..self.config.n_restarts {
            let (cand, found, dist) = self.run_restart(model, x, y, fixed, restart)?;
            for i in 0..n {
                let better_success = found[i] && dist[i] < out_dist[i];
                let first_fallback = !out_found[i] && !any_candidate;
                if better_success || first_fallback {
                    out.index_axis_mut(Axis(0), i)
                        .assign(&cand.index_axis(Axis(0), i));
                    if found[i] {
                        out_found[i] = true;
                        out_dist[i] = dist[i];
                    }
                }
            }
            any_candidate = true;
            if out_found.iter().all(|&f| f) {
                break;
            }
        }
        Ok(out)
    }
}
