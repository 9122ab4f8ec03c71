//! Attack adapters for robustness evaluation.
//!
//! Every adapter implements the same capability: given a batch of inputs
//! and their true labels, return a perturbed batch where each row lies
//! inside the configured norm ball of the corresponding input row,
//! best-effort misclassified. The orchestrator drives adapters purely
//! through this contract and trusts the ball guarantee.
//!
//! Adapters:
//! - [`GradAttack`]: projected-gradient ascent with SPSA gradient
//!   estimation; selectable loss (cross-entropy / margin-ratio) and
//!   targeted mode.
//! - [`BoundaryAttack`]: iterative projection onto the estimated decision
//!   boundary, keeping the successful candidate closest to the original.
//! - [`SquareAttack`]: black-box random search under a query budget.
//!
//! Mode switches (`set_loss`, `set_targeted`, `set_seed`) are cheap field
//! writes so one adapter instance can serve several pipeline stages.

pub mod boundary;
pub mod common;
pub mod grad;
pub mod square;

pub use boundary::{BoundaryAttack, BoundaryConfig};
pub use common::AttackLoss;
pub use grad::{GradAttack, GradConfig};
pub use square::{SquareAttack, SquareConfig};

use gauntlet_core::{Model, Result};
use ndarray::ArrayD;

/// The uniform perturb contract every attack adapter satisfies.
pub trait Attack {
    /// Short identifier for logs and reports.
    fn name(&self) -> &'static str;

    /// Re-seed the adapter's random source. Called by the orchestrator
    /// before every `perturb` invocation.
    fn set_seed(&mut self, seed: u64);

    /// Perturb a batch. The returned tensor has the same shape as `x` and
    /// every row lies inside the adapter's norm ball around the matching
    /// input row. Rows the attack could not break may equal the input or
    /// any other in-ball candidate.
    fn perturb(&mut self, model: &dyn Model, x: &ArrayD<f32>, y: &[usize]) -> Result<ArrayD<f32>>;
}
