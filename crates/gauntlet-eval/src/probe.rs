//! Batch accuracy probe.
//!
//! Runs forward inference over a sample set in bounded sub-batches and
//! reports which samples the model classifies correctly. Sub-batching is
//! purely a memory bound: results are concatenated in input order and are
//! identical for any batch size.

use gauntlet_core::{argmax_rows, GauntletError, Model, Result};
use ndarray::{ArrayD, Axis, Slice};

/// Default sub-batch size for model inference.
pub const DEFAULT_BATCH: usize = 250;

/// Per-sample correctness flags: `true` where argmax(scores) equals the
/// true label. Processes the set in sub-batches of `batch_size` (ceil
/// division, so the tail batch is never dropped) and propagates any
/// inference failure unchanged.
pub fn correct_flags(
    model: &dyn Model,
    x: &ArrayD<f32>,
    y: &[usize],
    batch_size: usize,
) -> Result<Vec<bool>> {
    let n = x.shape().first().copied().unwrap_or(0);
    if n != y.len() {
        return Err(GauntletError::ShapeMismatch {
            expected: vec![n],
            got: vec![y.len()],
        });
    }
    if batch_size == 0 {
        return Err(GauntletError::InvalidConfig(
            "batch size must be positive".into(),
        ));
    }

    let mut flags = Vec::with_capacity(n);
    let mut start = 0;
    while start < n {
        let end = (start + batch_size).min(n);
        let batch = x
            .slice_axis(Axis(0), Slice::from(start..end))
            .to_owned();
        let scores = model.predict(&batch)?;
        if scores.nrows() != end - start {
            return Err(GauntletError::ShapeMismatch {
                expected: vec![end - start],
                got: vec![scores.nrows()],
            });
        }
        let preds = argmax_rows(&scores);
        flags.extend(preds.iter().zip(&y[start..end]).map(|(p, t)| p == t));
        start = end;
    }
    Ok(flags)
}

/// Fraction of correctly classified samples.
pub fn accuracy(model: &dyn Model, x: &ArrayD<f32>, y: &[usize], batch_size: usize) -> Result<f32> {
    let flags = correct_flags(model, x, y, batch_size)?;
    if flags.is_empty() {
        return Ok(0.0);
    }
    Ok(flags.iter().filter(|&&f| f).count() as f32 / flags.len() as f32)
}
