//! The attack ensemble: an ordered pipeline of attack stages driven over
//! a shrinking still-robust subset.
//!
//! One adapter instance exists per algorithm; the gradient adapter serves
//! the cross-entropy, margin, and targeted stages through its cheap mode
//! switches, the boundary adapter serves the untargeted and targeted
//! boundary stages. Stage dispatch matches exhaustively on [`StageKind`].

use crate::pipeline::{perturbation_stats, run_stage, StageReport};
use crate::probe;
use crate::tracker::RobustnessTracker;
use gauntlet_attacks::{
    AttackLoss, BoundaryAttack, BoundaryConfig, GradAttack, GradConfig, SquareAttack, SquareConfig,
};
use gauntlet_core::{GauntletError, Model, Norm, Result, StageKind};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Construction-time configuration of an evaluation ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Perturbation norm family.
    pub norm: Norm,
    /// Perturbation budget; must be positive and finite.
    pub epsilon: f32,
    /// Fixed random seed. When absent every adapter invocation draws a
    /// fresh wall-clock-derived seed.
    pub seed: Option<u64>,
    /// Progress reporting. Never changes computed results.
    pub verbose: bool,
    /// Ordered stage plan for combined runs.
    pub stages: Vec<StageKind>,
    /// Append the two targeted stages to the plan (stronger, slower).
    /// Reconciled lazily at the start of every run, so flipping it
    /// between calls is honored.
    pub plus: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            norm: Norm::Linf,
            epsilon: 0.3,
            seed: None,
            verbose: true,
            stages: vec![
                StageKind::GradCe,
                StageKind::GradMargin,
                StageKind::Boundary,
                StageKind::Square,
            ],
            plus: false,
        }
    }
}

/// Evaluates a model's robust accuracy under an ordered attack ensemble.
pub struct AttackEnsemble {
    config: EnsembleConfig,
    grad: GradAttack,
    grad_targeted: GradAttack,
    boundary: BoundaryAttack,
    square: SquareAttack,
}

impl AttackEnsemble {
    pub fn new(config: EnsembleConfig) -> Result<Self> {
        if !(config.epsilon.is_finite() && config.epsilon > 0.0) {
            return Err(GauntletError::InvalidConfig(format!(
                "epsilon must be positive and finite, got {}",
                config.epsilon
            )));
        }
        if config.stages.is_empty() && !config.plus {
            return Err(GauntletError::InvalidConfig(
                "stage plan is empty and plus mode is off".into(),
            ));
        }

        let grad = GradAttack::new(config.norm, config.epsilon, GradConfig::default());
        // The targeted gradient stage runs a single restart per sample.
        let grad_targeted = GradAttack::new(
            config.norm,
            config.epsilon,
            GradConfig {
                n_restarts: 1,
                ..GradConfig::default()
            },
        );
        let boundary = BoundaryAttack::new(config.norm, config.epsilon, BoundaryConfig::default());
        let square = SquareAttack::new(config.norm, config.epsilon, SquareConfig::default());

        Ok(Self {
            config,
            grad,
            grad_targeted,
            boundary,
            square,
        })
    }

    #[inline]
    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Mutable access for between-run adjustments (e.g. flipping plus
    /// mode or verbosity).
    #[inline]
    pub fn config_mut(&mut self) -> &mut EnsembleConfig {
        &mut self.config
    }

    /// Trade thoroughness for speed: every restart count drops to one and
    /// the random-search query budget shrinks. Adapter configuration
    /// only; the orchestration is untouched.
    pub fn cheap(&mut self) {
        self.grad.config_mut().n_restarts = 1;
        self.grad_targeted.config_mut().n_restarts = 1;
        self.boundary.config_mut().n_restarts = 1;
        self.square.config_mut().n_queries = 1000;
        self.config.plus = false;
    }

    /// The effective stage plan for a run: the configured stages,
    /// de-duplicated in order, with the two targeted stages appended when
    /// plus mode is on and stripped when it is off. Pure; shared state is
    /// never mutated.
    pub fn reconcile_plan(&self) -> Vec<StageKind> {
        let mut plan: Vec<StageKind> = Vec::with_capacity(self.config.stages.len() + 2);
        for &kind in &self.config.stages {
            if !plan.contains(&kind) {
                plan.push(kind);
            }
        }
        if self.config.plus {
            for kind in [StageKind::GradTargeted, StageKind::BoundaryTargeted] {
                if !plan.contains(&kind) {
                    plan.push(kind);
                }
            }
        } else {
            plan.retain(|k| !k.is_targeted());
        }
        plan
    }

    /// Clean accuracy of the model over the sample set.
    pub fn clean_accuracy(
        &self,
        model: &dyn Model,
        x: &ArrayD<f32>,
        y: &[usize],
        batch_size: usize,
    ) -> Result<f32> {
        let acc = probe::accuracy(model, x, y, batch_size)?;
        if self.config.verbose {
            info!(accuracy = acc, "clean accuracy");
        }
        Ok(acc)
    }

    /// Combined run: the full stage plan as one pipeline over a shared
    /// tracker. Returns the merged adversarial tensor and the final
    /// robust accuracy.
    pub fn evaluate(
        &mut self,
        model: &dyn Model,
        x: &ArrayD<f32>,
        y: &[usize],
        batch_size: usize,
    ) -> Result<(ArrayD<f32>, f32)> {
        let plan = self.reconcile_plan();
        let verbose = self.config.verbose;
        self.run_combined(model, x, y, batch_size, &plan, verbose)
    }

    /// Per-attack runs: each plan entry gets a fresh single-stage
    /// pipeline with the tracker re-initialized from the clean set, so
    /// per-attack robust accuracy is reported without earlier stages
    /// having already broken samples.
    pub fn evaluate_individually(
        &mut self,
        model: &dyn Model,
        x: &ArrayD<f32>,
        y: &[usize],
        batch_size: usize,
    ) -> Result<BTreeMap<StageKind, ArrayD<f32>>> {
        let plan = self.reconcile_plan();
        let mut results = BTreeMap::new();
        for kind in plan {
            // Inner runs are silent regardless of the configured
            // verbosity; reporting happens here, per attack.
            let (adv, acc) = self.run_combined(model, x, y, batch_size, &[kind], false)?;
            if self.config.verbose {
                info!(attack = %kind, robust_accuracy = acc, "individual run complete");
            }
            results.insert(kind, adv);
        }
        Ok(results)
    }

    fn run_combined(
        &mut self,
        model: &dyn Model,
        x: &ArrayD<f32>,
        y: &[usize],
        batch_size: usize,
        plan: &[StageKind],
        verbose: bool,
    ) -> Result<(ArrayD<f32>, f32)> {
        let mut tracker = RobustnessTracker::initialize(model, x, y, batch_size)?;
        if verbose {
            info!(accuracy = tracker.robust_accuracy(), "initial accuracy");
        }

        for &kind in plan {
            if tracker.robust_count() == 0 {
                break;
            }
            self.run_one_stage(model, x, y, batch_size, kind, &mut tracker, verbose)?;
        }

        if verbose {
            let stats = perturbation_stats(x, tracker.adversarial(), self.config.norm);
            info!(
                norm = %self.config.norm,
                max_perturbation = stats.max_distance,
                nan_count = stats.nan_count,
                max = stats.max_value,
                min = stats.min_value,
                "final perturbation check"
            );
            info!(accuracy = tracker.robust_accuracy(), "robust accuracy");
        }

        let acc = tracker.robust_accuracy();
        Ok((tracker.into_adversarial(), acc))
    }

    /// Configure the adapter for one stage kind and drive it. The match
    /// is exhaustive over the closed stage vocabulary.
    #[allow(clippy::too_many_arguments)]
    fn run_one_stage(
        &mut self,
        model: &dyn Model,
        x: &ArrayD<f32>,
        y: &[usize],
        batch_size: usize,
        kind: StageKind,
        tracker: &mut RobustnessTracker,
        verbose: bool,
    ) -> Result<StageReport> {
        let id = kind.to_string();
        let seed = self.config.seed;
        match kind {
            StageKind::GradCe => {
                self.grad.set_loss(AttackLoss::CrossEntropy);
                self.grad.set_targeted(false);
                run_stage(
                    model, x, y, &id, &mut self.grad, tracker, batch_size, seed, verbose,
                )
            }
            StageKind::GradMargin => {
                self.grad.set_loss(AttackLoss::MarginRatio);
                self.grad.set_targeted(false);
                run_stage(
                    model, x, y, &id, &mut self.grad, tracker, batch_size, seed, verbose,
                )
            }
            StageKind::Boundary => {
                self.boundary.set_targeted(false);
                run_stage(
                    model, x, y, &id, &mut self.boundary, tracker, batch_size, seed, verbose,
                )
            }
            StageKind::Square => run_stage(
                model, x, y, &id, &mut self.square, tracker, batch_size, seed, verbose,
            ),
            StageKind::GradTargeted => {
                self.grad_targeted.set_loss(AttackLoss::MarginRatio);
                self.grad_targeted.set_targeted(true);
                run_stage(
                    model,
                    x,
                    y,
                    &id,
                    &mut self.grad_targeted,
                    tracker,
                    batch_size,
                    seed,
                    verbose,
                )
            }
            StageKind::BoundaryTargeted => {
                self.boundary.set_targeted(true);
                run_stage(
                    model, x, y, &id, &mut self.boundary, tracker, batch_size, seed, verbose,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(stages: Vec<StageKind>, plus: bool) -> EnsembleConfig {
        EnsembleConfig {
            epsilon: 0.5,
            seed: Some(42),
            verbose: false,
            stages,
            plus,
            ..EnsembleConfig::default()
        }
    }

    #[test]
    fn test_plan_reconciliation_appends_targeted_stages() {
        let ensemble =
            AttackEnsemble::new(config_with(vec![StageKind::GradCe, StageKind::Square], true))
                .unwrap();
        assert_eq!(
            ensemble.reconcile_plan(),
            vec![
                StageKind::GradCe,
                StageKind::Square,
                StageKind::GradTargeted,
                StageKind::BoundaryTargeted,
            ]
        );
    }

    #[test]
    fn test_plan_reconciliation_strips_targeted_stages() {
        let ensemble = AttackEnsemble::new(config_with(
            vec![
                StageKind::GradCe,
                StageKind::GradTargeted,
                StageKind::BoundaryTargeted,
            ],
            false,
        ))
        .unwrap();
        assert_eq!(ensemble.reconcile_plan(), vec![StageKind::GradCe]);
    }

    #[test]
    fn test_plan_reconciliation_is_lazy() {
        let mut ensemble =
            AttackEnsemble::new(config_with(vec![StageKind::GradCe], false)).unwrap();
        assert_eq!(ensemble.reconcile_plan().len(), 1);

        // Flipping the flag between calls changes the next plan without
        // touching the configured stage list.
        ensemble.config_mut().plus = true;
        assert_eq!(ensemble.reconcile_plan().len(), 3);
        assert_eq!(ensemble.config().stages, vec![StageKind::GradCe]);

        ensemble.config_mut().plus = false;
        assert_eq!(ensemble.reconcile_plan().len(), 1);
    }

    #[test]
    fn test_plan_deduplicates_preserving_order() {
        let ensemble = AttackEnsemble::new(config_with(
            vec![
                StageKind::Square,
                StageKind::GradCe,
                StageKind::Square,
                StageKind::GradCe,
            ],
            false,
        ))
        .unwrap();
        assert_eq!(
            ensemble.reconcile_plan(),
            vec![StageKind::Square, StageKind::GradCe]
        );
    }

    #[test]
    fn test_invalid_epsilon_is_rejected() {
        for eps in [0.0_f32, -1.0, f32::NAN, f32::INFINITY] {
            let config = EnsembleConfig {
                epsilon: eps,
                ..EnsembleConfig::default()
            };
            assert!(AttackEnsemble::new(config).is_err(), "eps {eps} accepted");
        }
    }

    #[test]
    fn test_empty_plan_without_plus_is_rejected() {
        assert!(AttackEnsemble::new(config_with(vec![], false)).is_err());
        assert!(AttackEnsemble::new(config_with(vec![], true)).is_ok());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = EnsembleConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EnsembleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stages, config.stages);
        assert_eq!(back.epsilon, config.epsilon);
        assert_eq!(back.plus, config.plus);
    }
}
