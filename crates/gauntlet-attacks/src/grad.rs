//! Projected-gradient attack with SPSA gradient estimation.
//!
//! The model boundary exposes class scores only, so gradients are
//! estimated with two-point SPSA probes instead of backpropagation. Each
//! restart runs a fixed number of ascent steps on the configured loss and
//! projects back into the norm ball after every step. Restarts are
//! independent draws; their results are merged in restart order, so the
//! parallel path is observationally identical to the sequential one.

use crate::common::{
    ascent_step, batch_loss, broken_mask, check_batch, runner_up_classes, sample_in_ball,
    spsa_gradient_with, AttackLoss,
};
use crate::Attack;
use gauntlet_core::{Model, Norm, Result};
use ndarray::{ArrayD, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for the projected-gradient attack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradConfig {
    /// Independent random restarts per invocation; best result kept.
    pub n_restarts: usize,
    /// Ascent steps per restart.
    pub n_iters: usize,
    /// Step size as a fraction of epsilon.
    pub step_frac: f32,
    /// Probe magnitude for SPSA gradient estimation.
    pub spsa_delta: f32,
    /// Run restarts on the rayon pool.
    pub parallel: bool,
}

impl Default for GradConfig {
    fn default() -> Self {
        Self {
            n_restarts: 5,
            n_iters: 40,
            step_frac: 0.25,
            spsa_delta: 1e-3,
            parallel: false,
        }
    }
}

impl GradConfig {
    /// Single-restart variant for quick runs.
    pub fn fast() -> Self {
        Self {
            n_restarts: 1,
            n_iters: 20,
            ..Self::default()
        }
    }
}

/// What one restart produced, per sample.
struct RestartOutcome {
    candidate: ArrayD<f32>,
    broken: Vec<bool>,
    loss: Vec<f32>,
}

/// Projected-gradient attack adapter.
pub struct GradAttack {
    config: GradConfig,
    norm: Norm,
    eps: f32,
    loss: AttackLoss,
    targeted: bool,
    seed: u64,
}

impl GradAttack {
    pub fn new(norm: Norm, eps: f32, config: GradConfig) -> Self {
        Self {
            config,
            norm,
            eps,
            loss: AttackLoss::CrossEntropy,
            targeted: false,
            seed: 0,
        }
    }

    /// Switch the attack objective. Cheap; no reconstruction.
    pub fn set_loss(&mut self, loss: AttackLoss) {
        self.loss = loss;
    }

    /// Toggle targeted mode. In targeted mode every sample is driven
    /// toward its clean runner-up class.
    pub fn set_targeted(&mut self, targeted: bool) {
        self.targeted = targeted;
    }

    pub fn config_mut(&mut self) -> &mut GradConfig {
        &mut self.config
    }

    fn run_restart(
        &self,
        model: &dyn Model,
        x: &ArrayD<f32>,
        y: &[usize],
        targets: Option<&[usize]>,
        restart: usize,
    ) -> Result<RestartOutcome> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(restart as u64));

        // Restart 0 climbs from the clean input; later restarts start
        // from a random point in the ball.
        let mut cur = if restart == 0 {
            x.clone()
        } else {
            sample_in_ball(x, self.norm, self.eps, &mut rng)
        };

        let step = self.eps * self.config.step_frac;
        for _ in 0..self.config.n_iters {
            let grad = spsa_gradient_with(model, &cur, self.config.spsa_delta, &mut rng, |s| {
                batch_loss(s, y, targets, self.loss)
            })?;
            ascent_step(&mut cur, &grad, self.norm, step);
            cur = self.norm.project_batch(&cur, x, self.eps);
        }

        let scores = model.predict(&cur)?;
        Ok(RestartOutcome {
            broken: broken_mask(&scores, y),
            loss: batch_loss(&scores, y, targets, self.loss),
            candidate: cur,
        })
    }

    /// Fold restart outcomes in restart order: the first restart that
    /// breaks a sample wins it; unbroken samples keep the candidate with
    /// the highest loss seen so far.
    fn merge(&self, x: &ArrayD<f32>, outcomes: Vec<RestartOutcome>) -> ArrayD<f32> {
        let n = x.shape()[0];
        let mut out = x.clone();
        let mut won = vec![false; n];
        let mut best_loss = vec![f32::NEG_INFINITY; n];

        for outcome in outcomes {
            for i in 0..n {
                if won[i] {
                    continue;
                }
                let take = outcome.broken[i] || outcome.loss[i] > best_loss[i];
                if take {
                    out.index_axis_mut(Axis(0), i)
                        .assign(&outcome.candidate.index_axis(Axis(0), i));
                    best_loss[i] = outcome.loss[i];
                    won[i] = outcome.broken[i];
                }
            }
        }
        out
    }
}

impl Attack for GradAttack {
    fn name(&self) -> &'static str {
        "grad"
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    fn perturb(&mut self, model: &dyn Model, x: &ArrayD<f32>, y: &[usize]) -> Result<ArrayD<f32>> {
        check_batch(x, y)?;

        let targets = if self.targeted {
            Some(runner_up_classes(&model.predict(x)?, y))
        } else {
            None
        };
        let targets = targets.as_deref();

        let outcomes = if self.config.parallel && self.config.n_restarts > 1 {
            (0..self.config.n_restarts)
                .into_par_iter()
                .map(|r| self.run_restart(model, x, y, targets, r))
                .collect::<Result<Vec<_>>>()?
        } else {
            let mut acc = Vec::with_capacity(self.config.n_restarts);
            for r in 0..self.config.n_restarts {
                let outcome = self.run_restart(model, x, y, targets, r)?;
                let all_broken = outcome.broken.iter().all(|&b| b);
                acc.push(outcome);
                if all_broken {
                    debug!(restart = r, "all samples broken, stopping restarts early");
                    break;
                }
            }
            acc
        };

        Ok(self.merge(x, outcomes))
    }
}
