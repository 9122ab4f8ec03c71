//! Evaluate a tiny linear classifier under the default attack ensemble.
//!
//! Run with `cargo run --example evaluate_linear`.

use gauntlet_eval::{AttackEnsemble, EnsembleConfig, Model, Norm, Result, StageKind};
use ndarray::{Array2, ArrayD, Axis, IxDyn};

/// Two-class linear scorer over two features.
struct TinyClassifier;

impl Model for TinyClassifier {
    fn predict(&self, batch: &ArrayD<f32>) -> Result<Array2<f32>> {
        let n = batch.shape()[0];
        let mut scores = Array2::<f32>::zeros((n, 2));
        for (i, row) in batch.axis_iter(Axis(0)).enumerate() {
            let v: Vec<f32> = row.iter().copied().collect();
            scores[[i, 0]] = v[0] + 0.5 * v[1];
            scores[[i, 1]] = -v[0] + 0.2 * v[1];
        }
        Ok(scores)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    // A band of samples straddling weak and strong margins.
    let n = 32;
    let mut x = ArrayD::<f32>::zeros(IxDyn(&[n, 2]));
    let mut y = Vec::with_capacity(n);
    for i in 0..n {
        let v = -0.4 + 0.05 * i as f32;
        x[[i, 0]] = v;
        x[[i, 1]] = 0.1;
        y.push(if v + 0.5 * 0.1 > -v + 0.2 * 0.1 { 0 } else { 1 });
    }

    let model = TinyClassifier;
    let mut ensemble = AttackEnsemble::new(EnsembleConfig {
        norm: Norm::Linf,
        epsilon: 0.1,
        seed: Some(0),
        verbose: true,
        stages: vec![
            StageKind::GradCe,
            StageKind::GradMargin,
            StageKind::Boundary,
            StageKind::Square,
        ],
        plus: false,
    })?;
    ensemble.cheap();

    let clean = ensemble.clean_accuracy(&model, &x, &y, 250)?;
    let (adversarial, robust) = ensemble.evaluate(&model, &x, &y, 250)?;
    println!("clean accuracy:  {clean:.2}");
    println!("robust accuracy: {robust:.2}");

    let per_attack = ensemble.evaluate_individually(&model, &x, &y, 250)?;
    for (kind, adv) in &per_attack {
        let acc = gauntlet_eval::accuracy(&model, adv, &y, 250)?;
        println!("robust accuracy under {kind}: {acc:.2}");
    }

    // The combined tensor is what a downstream consumer would save.
    assert_eq!(adversarial.shape(), x.shape());
    Ok(())
}
