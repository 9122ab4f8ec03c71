//! Test doubles shared by the unit tests: a deterministic model keyed on
//! the first feature and a mock attack with observable behavior.

use gauntlet_attacks::Attack;
use gauntlet_core::{GauntletError, Model, Result};
use ndarray::{Array2, ArrayD, Axis, Slice};

/// Classifies by rounding the first feature to the nearest class index:
/// score for class `c` is `-(x0 - c)^2`.
pub struct LabelModel {
    pub classes: usize,
    pub fail: bool,
}

impl Model for LabelModel {
    fn predict(&self, batch: &ArrayD<f32>) -> Result<Array2<f32>> {
        if self.fail {
            return Err(GauntletError::Inference("injected failure".into()));
        }
        let n = batch.shape()[0];
        let mut scores = Array2::<f32>::zeros((n, self.classes));
        for (i, row) in batch.axis_iter(Axis(0)).enumerate() {
            let x0 = row.iter().next().copied().unwrap_or(0.0);
            for c in 0..self.classes {
                scores[[i, c]] = -(x0 - c as f32).powi(2);
            }
        }
        Ok(scores)
    }
}

pub fn label_model(classes: usize) -> LabelModel {
    LabelModel {
        classes,
        fail: false,
    }
}

/// Deterministic mock attack: adds a constant to every element. Records
/// call count and the shapes it was handed, so tests can observe whether
/// and how the orchestrator invoked it.
pub struct ShiftAttack {
    pub shift: f32,
    pub calls: usize,
    pub seen_shapes: Vec<Vec<usize>>,
    pub drop_last_row: bool,
}

impl ShiftAttack {
    pub fn new(shift: f32) -> Self {
        Self {
            shift,
            calls: 0,
            seen_shapes: Vec::new(),
            drop_last_row: false,
        }
    }
}

impl Attack for ShiftAttack {
    fn name(&self) -> &'static str {
        "shift"
    }

    fn set_seed(&mut self, _seed: u64) {}

    fn perturb(
        &mut self,
        _model: &dyn Model,
        x: &ArrayD<f32>,
        _y: &[usize],
    ) -> Result<ArrayD<f32>> {
        self.calls += 1;
        self.seen_shapes.push(x.shape().to_vec());
        let shifted = x.mapv(|v| v + self.shift);
        if self.drop_last_row {
            let n = x.shape()[0];
            let end = n.saturating_sub(1) as isize;
            return Ok(shifted
                .slice_axis(Axis(0), Slice::from(..end))
                .to_owned());
        }
        Ok(shifted)
    }
}
