//! Core types and capability traits for attack-ensemble robustness
//! evaluation.
//!
//! This crate provides the shared vocabulary used by the attack adapters
//! and the evaluation orchestrator: the perturbation norm and its ball
//! geometry, the closed set of attack stages, the model capability trait,
//! and the error type.

use ndarray::{ArrayD, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Perturbation norm families supported by the evaluation.
///
/// The set is closed: every attack and every diagnostic is defined for
/// exactly these two norms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Norm {
    /// Sup-norm ball: every coordinate within `eps` of the original.
    Linf,
    /// Euclidean ball: the perturbation vector has 2-norm at most `eps`.
    L2,
}

impl Norm {
    /// Project each row of `x` (axis 0 = batch) into the eps-ball around
    /// the corresponding row of `origin`.
    ///
    /// Rank-preserving for every batch size, including a single sample.
    pub fn project_batch(&self, x: &ArrayD<f32>, origin: &ArrayD<f32>, eps: f32) -> ArrayD<f32> {
        debug_assert_eq!(x.shape(), origin.shape());
        let mut out = x.clone();
        match self {
            Norm::Linf => {
                for (v, o) in out.iter_mut().zip(origin.iter()) {
                    *v = v.clamp(o - eps, o + eps);
                }
            }
            Norm::L2 => {
                for (mut row, orig) in out
                    .axis_iter_mut(Axis(0))
                    .zip(origin.axis_iter(Axis(0)))
                {
                    let sq: f32 = row
                        .iter()
                        .zip(orig.iter())
                        .map(|(v, o)| (v - o) * (v - o))
                        .sum();
                    let dist = sq.sqrt();
                    if dist > eps {
                        let scale = eps / dist;
                        for (v, o) in row.iter_mut().zip(orig.iter()) {
                            *v = o + (*v - o) * scale;
                        }
                    }
                }
            }
        }
        out
    }

    /// Per-sample distance between corresponding rows of two batch tensors.
    pub fn row_distances(&self, orig: &ArrayD<f32>, adv: &ArrayD<f32>) -> Vec<f32> {
        debug_assert_eq!(orig.shape(), adv.shape());
        orig.axis_iter(Axis(0))
            .zip(adv.axis_iter(Axis(0)))
            .map(|(o, a)| match self {
                Norm::Linf => o
                    .iter()
                    .zip(a.iter())
                    .map(|(x, y)| (x - y).abs())
                    .fold(0.0_f32, f32::max),
                Norm::L2 => o
                    .iter()
                    .zip(a.iter())
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f32>()
                    .sqrt(),
            })
            .collect()
    }
}

impl fmt::Display for Norm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Norm::Linf => write!(f, "linf"),
            Norm::L2 => write!(f, "l2"),
        }
    }
}

impl FromStr for Norm {
    type Err = GauntletError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linf" => Ok(Norm::Linf),
            "l2" => Ok(Norm::L2),
            other => Err(GauntletError::InvalidConfig(format!(
                "unknown norm '{other}' (expected 'linf' or 'l2')"
            ))),
        }
    }
}

/// The closed vocabulary of attack stages.
///
/// Stage dispatch matches exhaustively on this enum, so an unsupported
/// identifier is unrepresentable past config parsing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum StageKind {
    /// Projected-gradient attack on the cross-entropy loss.
    GradCe,
    /// Projected-gradient attack on the margin-ratio loss.
    GradMargin,
    /// Decision-boundary projection attack, untargeted.
    Boundary,
    /// Black-box random-search attack with a query budget.
    Square,
    /// Projected-gradient attack toward each sample's runner-up class.
    GradTargeted,
    /// Decision-boundary projection attack toward the runner-up class.
    BoundaryTargeted,
}

impl StageKind {
    /// Whether this stage optimizes toward a specific wrong class.
    #[inline]
    pub fn is_targeted(&self) -> bool {
        matches!(self, StageKind::GradTargeted | StageKind::BoundaryTargeted)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageKind::GradCe => "grad-ce",
            StageKind::GradMargin => "grad-margin",
            StageKind::Boundary => "boundary",
            StageKind::Square => "square",
            StageKind::GradTargeted => "grad-t",
            StageKind::BoundaryTargeted => "boundary-t",
        };
        write!(f, "{s}")
    }
}

impl FromStr for StageKind {
    type Err = GauntletError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "grad-ce" => Ok(StageKind::GradCe),
            "grad-margin" => Ok(StageKind::GradMargin),
            "boundary" => Ok(StageKind::Boundary),
            "square" => Ok(StageKind::Square),
            "grad-t" => Ok(StageKind::GradTargeted),
            "boundary-t" => Ok(StageKind::BoundaryTargeted),
            other => Err(GauntletError::InvalidConfig(format!(
                "unknown attack stage '{other}'"
            ))),
        }
    }
}

/// Classifier capability used by the probe and by every attack adapter.
///
/// `predict` maps a batch (axis 0 = samples) to a score matrix with one
/// row per sample and one column per class. Implementations own all
/// device and memory placement decisions; callers never interpret them.
///
/// The trait requires `Sync + Send` so adapters may evaluate independent
/// restarts on a rayon pool.
pub trait Model: Sync + Send {
    fn predict(&self, batch: &ArrayD<f32>) -> Result<Array2<f32>>;
}

/// Predicted class (argmax of scores) for each row.
pub fn argmax_rows(scores: &Array2<f32>) -> Vec<usize> {
    scores
        .axis_iter(Axis(0))
        .map(|row| {
            let mut best = 0usize;
            let mut best_val = f32::NEG_INFINITY;
            for (i, &v) in row.iter().enumerate() {
                if v > best_val {
                    best_val = v;
                    best = i;
                }
            }
            best
        })
        .collect()
}

/// Error type for evaluation operations.
#[derive(Debug)]
pub enum GauntletError {
    /// Invalid configuration: unknown norm or stage name, bad epsilon,
    /// empty sample set. Raised eagerly, never skipped over.
    InvalidConfig(String),

    /// A tensor had the wrong shape, e.g. label count vs. batch rows, or
    /// an adapter returned a batch of a different shape than its input.
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Model inference failed. Propagated unchanged, no retry.
    Inference(String),
}

impl fmt::Display for GauntletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GauntletError::InvalidConfig(s) => write!(f, "Invalid configuration: {s}"),
            GauntletError::ShapeMismatch { expected, got } => {
                write!(f, "Shape mismatch: expected {expected:?}, got {got:?}")
            }
            GauntletError::Inference(s) => write!(f, "Model inference failed: {s}"),
        }
    }
}

impl std::error::Error for GauntletError {}

pub type Result<T> = std::result::Result<T, GauntletError>;
