//! Black-box random-search attack with a query budget.
//!
//! No gradient information at all: starting from a full-magnitude random
//! sign perturbation, the attack repeatedly re-randomizes a random subset
//! of coordinates and keeps the proposal per sample iff it lowers the
//! margin between the true class and the strongest rival. The subset
//! size decays over the query budget, coarse moves first and fine moves
//! late. A sample stops consuming proposals as soon as it is
//! misclassified.

use crate::common::{broken_mask, check_batch};
use crate::Attack;
use gauntlet_core::{Model, Norm, Result};
use ndarray::{Array2, ArrayD, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Configuration for the random-search attack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquareConfig {
    /// Model evaluation budget per invocation.
    pub n_queries: usize,
    /// Initial fraction of coordinates re-randomized per proposal.
    pub p_init: f32,
}

impl Default for SquareConfig {
    fn default() -> Self {
        Self {
            n_queries: 5000,
            p_init: 0.8,
        }
    }
}

/// Random-search attack adapter.
pub struct SquareAttack {
    config: SquareConfig,
    norm: Norm,
    eps: f32,
    seed: u64,
}

impl SquareAttack {
    pub fn new(norm: Norm, eps: f32, config: SquareConfig) -> Self {
        Self {
            config,
            norm,
            eps,
            seed: 0,
        }
    }

    pub fn config_mut(&mut self) -> &mut SquareConfig {
        &mut self.config
    }

    /// Margin z_true - z_rival per sample; negative means misclassified.
    fn margins(scores: &Array2<f32>, y: &[usize]) -> Vec<f32> {
        scores
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(i, row)| {
                let mut rival = f32::NEG_INFINITY;
                for (j, &v) in row.iter().enumerate() {
                    if j != y[i] && v > rival {
                        rival = v;
                    }
                }
                row[y[i]] - rival
            })
            .collect()
    }

    /// Fraction of coordinates to flip at this point in the budget,
    /// halving at fixed milestones of the schedule.
    fn flip_fraction(&self, query: usize) -> f32 {
        let t = query as f32 / self.config.n_queries.max(1) as f32;
        let halvings = [0.05_f32, 0.1, 0.2, 0.4, 0.6, 0.8]
            .iter()
            .filter(|&&m| t >= m)
            .count();
        self.config.p_init * 0.5_f32.powi(halvings as i32)
    }
}

impl Attack for SquareAttack {
    fn name(&self) -> &'static str {
        "square"
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    fn perturb(&mut self, model: &dyn Model, x: &ArrayD<f32>, y: &[usize]) -> Result<ArrayD<f32>> {
        check_batch(x, y)?;
        let n = x.shape()[0];
        let d: usize = x.shape()[1..].iter().product();
        let mut rng = StdRng::seed_from_u64(self.seed);

        // Full-magnitude sign initialization for the sup-norm; for the
        // Euclidean norm the same start is projected onto the sphere.
        let mut cur = x.clone();
        for (v, o) in cur.iter_mut().zip(x.iter()) {
            let sign = if rng.random::<bool>() { 1.0 } else { -1.0 };
            *v = o + sign * self.eps;
        }
        cur = self.norm.project_batch(&cur, x, self.eps);

        let scores = model.predict(&cur)?;
        let mut loss = Self::margins(&scores, y);
        let mut broken = broken_mask(&scores, y);

        for query in 1..self.config.n_queries {
            if broken.iter().all(|&b| b) {
                trace!(query, "all samples broken, stopping early");
                break;
            }

            let p = self.flip_fraction(query);
            let k = ((p * d as f32).round() as usize).clamp(1, d);

            let mut proposal = cur.clone();
            for (i, mut row) in proposal.axis_iter_mut(Axis(0)).enumerate() {
                if broken[i] {
                    continue;
                }
                let mut chosen = vec![false; d];
                for _ in 0..k {
                    chosen[rng.random_range(0..d)] = true;
                }
                let orig = x.index_axis(Axis(0), i);
                for ((j, v), o) in row.iter_mut().enumerate().zip(orig.iter()) {
                    if chosen[j] {
                        let sign = if rng.random::<bool>() { 1.0 } else { -1.0 };
                        *v = o + sign * self.eps;
                    }
                }
            }
            let proposal = self.norm.project_batch(&proposal, x, self.eps);

            let scores = model.predict(&proposal)?;
            let new_loss = Self::margins(&scores, y);
            for (i, better) in new_loss.iter().enumerate() {
                if !broken[i] && *better < loss[i] {
                    cur.index_axis_mut(Axis(0), i)
                        .assign(&proposal.index_axis(Axis(0), i));
                    loss[i] = *better;
                    if *better < 0.0 {
                        broken[i] = true;
                    }
                }
            }
        }

        debug_assert!(self
            .norm
            .row_distances(x, &cur)
            .iter()
            .all(|&dist| dist <= self.eps + 1e-4));
        Ok(cur)
    }
}
