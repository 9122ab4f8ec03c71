//! Attack-ensemble robustness evaluation.
//!
//! Evaluates how robust a classifier is by running an ordered ensemble of
//! attacks over a sample set, tracking per sample whether any attack has
//! found an in-ball perturbation that flips the prediction. Samples a
//! stage breaks are permanently excluded from later stages, so per-stage
//! work is bounded by the count of still-unbroken samples.
//!
//! # Example
//! ```ignore
//! use gauntlet_eval::{AttackEnsemble, EnsembleConfig};
//!
//! let mut ensemble = AttackEnsemble::new(EnsembleConfig::default())?;
//! let clean = ensemble.clean_accuracy(&model, &inputs, &labels, 250)?;
//! let (adversarial, robust) = ensemble.evaluate(&model, &inputs, &labels, 250)?;
//! println!("clean {clean:.2}, robust {robust:.2}");
//! ```

pub mod ensemble;
pub mod pipeline;
pub mod probe;
pub mod tracker;

pub use ensemble::{AttackEnsemble, EnsembleConfig};
pub use pipeline::{
    perturbation_stats, run_stage, wall_clock_seed, PerturbationStats, StageReport,
};
pub use probe::{accuracy, correct_flags, DEFAULT_BATCH};
pub use tracker::RobustnessTracker;

// Re-export the contract types downstream code needs to drive or extend
// the pipeline.
pub use gauntlet_attacks::{
    Attack, AttackLoss, BoundaryAttack, BoundaryConfig, GradAttack, GradConfig, SquareAttack,
    SquareConfig,
};
pub use gauntlet_core::{argmax_rows, GauntletError, Model, Norm, Result, StageKind};

#[cfg(test)]
pub(crate) mod testutil;
