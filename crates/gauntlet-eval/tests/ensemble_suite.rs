//! End-to-end evaluation scenarios driving the real ensemble and the
//! pipeline engine with hand-built linear models.

use gauntlet_eval::{
    accuracy, argmax_rows, run_stage, Attack, AttackEnsemble, EnsembleConfig, GauntletError,
    Model, Norm, Result, RobustnessTracker, StageKind,
};
use ndarray::{arr2, Array2, ArrayD, Axis};

/// Two-class scorer on one feature: class 0 scores +x, class 1 scores -x.
/// The decision boundary is x = 0 and the margin is 2|x|.
struct SignModel;

impl Model for SignModel {
    fn predict(&self, batch: &ArrayD<f32>) -> Result<Array2<f32>> {
        let n = batch.shape()[0];
        let mut scores = Array2::<f32>::zeros((n, 2));
        for (i, row) in batch.axis_iter(Axis(0)).enumerate() {
            let x0 = row.iter().next().copied().unwrap_or(0.0);
            scores[[i, 0]] = x0;
            scores[[i, 1]] = -x0;
        }
        Ok(scores)
    }
}

/// Mock adapter that either breaks everything (pushes the feature past
/// the boundary) or nothing, while counting invocations.
struct CountingAttack {
    delta: f32,
    calls: usize,
}

impl Attack for CountingAttack {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn set_seed(&mut self, _seed: u64) {}

    fn perturb(
        &mut self,
        _model: &dyn Model,
        x: &ArrayD<f32>,
        _y: &[usize],
    ) -> Result<ArrayD<f32>> {
        self.calls += 1;
        Ok(x.mapv(|v| v + self.delta))
    }
}

fn ensemble(stages: Vec<StageKind>, epsilon: f32) -> AttackEnsemble {
    let mut e = AttackEnsemble::new(EnsembleConfig {
        norm: Norm::Linf,
        epsilon,
        seed: Some(42),
        verbose: false,
        stages,
        plus: false,
    })
    .unwrap();
    e.cheap();
    e
}

#[test]
fn clean_mistake_is_excluded_and_keeps_its_original_row() {
    let model = SignModel;
    // Sample 2 is labeled 1 but sits on the positive side: wrong on the
    // clean input. The rest carry margins far beyond the budget.
    let x = arr2(&[[2.0_f32], [3.0], [0.5], [4.0]]).into_dyn();
    let y = [0, 0, 1, 0];
    let mut e = ensemble(vec![StageKind::GradCe, StageKind::GradMargin], 0.1);

    assert!((e.clean_accuracy(&model, &x, &y, 250).unwrap() - 0.75).abs() < 1e-6);

    let (adv, robust) = e.evaluate(&model, &x, &y, 250).unwrap();
    // Nothing else is breakable within 0.1, so the baseline survives.
    assert!((robust - 0.75).abs() < 1e-6);
    // The clean mistake was never attacked: its row is the original.
    assert_eq!(adv[[2, 0]], 0.5);
    // Robust samples keep their originals exactly.
    for i in [0usize, 1, 3] {
        assert_eq!(adv[[i, 0]], x[[i, 0]]);
    }
}

#[test]
fn universally_successful_stage_drives_accuracy_to_zero() {
    let model = SignModel;
    // Every margin is tiny next to the budget.
    let x = arr2(&[[0.05_f32], [-0.04], [0.02], [0.06]]).into_dyn();
    let y = [0, 1, 0, 0];
    let mut e = ensemble(vec![StageKind::GradCe], 0.5);

    assert_eq!(e.clean_accuracy(&model, &x, &y, 250).unwrap(), 1.0);

    let (adv, robust) = e.evaluate(&model, &x, &y, 250).unwrap();
    assert_eq!(robust, 0.0);
    // Every initially-robust sample's row actually changed.
    for i in 0..4 {
        assert_ne!(adv[[i, 0]], x[[i, 0]], "row {i} untouched");
    }
    // And every row is misclassified now.
    let preds = argmax_rows(&model.predict(&adv).unwrap());
    for (i, (&p, &t)) in preds.iter().zip(&y).enumerate() {
        assert_ne!(p, t, "row {i} still correct");
    }
}

#[test]
fn second_stage_is_never_invoked_once_the_set_is_empty() {
    let model = SignModel;
    let x = arr2(&[[0.1_f32], [0.2]]).into_dyn();
    let y = [0, 0];
    let mut tracker = RobustnessTracker::initialize(&model, &x, &y, 250).unwrap();

    // Stage 1 pushes both samples across the boundary.
    let mut first = CountingAttack {
        delta: -1.0,
        calls: 0,
    };
    let report = run_stage(
        &model, &x, &y, "break-all", &mut first, &mut tracker, 250, Some(0), false,
    )
    .unwrap();
    assert_eq!(report.newly_broken, 2);
    assert_eq!(tracker.robust_count(), 0);

    // Stage 2 finds an empty active set and must not touch its adapter.
    let mut second = CountingAttack {
        delta: -1.0,
        calls: 0,
    };
    let report = run_stage(
        &model, &x, &y, "late", &mut second, &mut tracker, 250, Some(0), false,
    )
    .unwrap();
    assert_eq!(report.attacked, 0);
    assert_eq!(second.calls, 0);
}

#[test]
fn robust_count_shrinks_monotonically_across_stages() {
    let model = SignModel;
    let x = arr2(&[[0.1_f32], [0.4], [0.9], [2.0]]).into_dyn();
    let y = [0, 0, 0, 0];
    let mut tracker = RobustnessTracker::initialize(&model, &x, &y, 250).unwrap();

    // Successive stages with growing reach.
    let mut counts = vec![tracker.robust_count()];
    for delta in [-0.2_f32, -0.5, -1.0] {
        let mut attack = CountingAttack { delta, calls: 0 };
        run_stage(
            &model, &x, &y, "stage", &mut attack, &mut tracker, 250, Some(0), false,
        )
        .unwrap();
        counts.push(tracker.robust_count());
    }

    // Conservation: each stage can only shrink the set.
    for pair in counts.windows(2) {
        assert!(pair[1] <= pair[0]);
    }
    // Each stage reaches exactly one more sample; broken samples are
    // never revisited even though later deltas would break them too.
    assert_eq!(counts, vec![4, 3, 2, 1]);
}

#[test]
fn single_stage_individual_run_matches_the_combined_run() {
    let model = SignModel;
    let x = arr2(&[[0.05_f32], [0.3], [1.5]]).into_dyn();
    let y = [0, 0, 0];

    let mut combined = ensemble(vec![StageKind::GradCe], 0.4);
    let (adv_combined, acc_combined) = combined.evaluate(&model, &x, &y, 250).unwrap();

    let mut individual = ensemble(vec![StageKind::GradCe], 0.4);
    let per_attack = individual.evaluate_individually(&model, &x, &y, 250).unwrap();
    let adv_individual = &per_attack[&StageKind::GradCe];

    assert_eq!(&adv_combined, adv_individual);
    let acc_individual = accuracy(&model, adv_individual, &y, 250).unwrap();
    assert!((acc_combined - acc_individual).abs() < 1e-6);
}

#[test]
fn survivors_keep_originals_and_breaks_stay_in_the_ball() {
    let model = SignModel;
    let eps = 0.3;
    let x = arr2(&[[0.1_f32], [0.25], [1.0], [-0.05], [2.5]]).into_dyn();
    let y = [0, 0, 0, 1, 0];
    let mut e = ensemble(
        vec![StageKind::GradCe, StageKind::Boundary, StageKind::Square],
        eps,
    );

    let (adv, _) = e.evaluate(&model, &x, &y, 250).unwrap();
    let preds = argmax_rows(&model.predict(&adv).unwrap());
    let dists = Norm::Linf.row_distances(&x, &adv);

    for i in 0..x.shape()[0] {
        if preds[i] == y[i] {
            // Still robust: the adversarial entry is the clean original.
            assert_eq!(adv[[i, 0]], x[[i, 0]], "robust row {i} was modified");
        } else {
            // Broken: within budget, up to numerical tolerance.
            assert!(dists[i] <= eps + 1e-4, "row {i} exceeds the ball: {}", dists[i]);
        }
    }
    // The far sample is unbreakable under this budget.
    assert_eq!(preds[4], 0);
}

#[test]
fn plus_mode_appends_targeted_stages_between_runs() {
    let model = SignModel;
    let x = arr2(&[[0.1_f32], [1.0]]).into_dyn();
    let y = [0, 0];

    let mut e = ensemble(vec![StageKind::GradCe], 0.3);
    let baseline_plan = e.reconcile_plan();
    assert_eq!(baseline_plan, vec![StageKind::GradCe]);

    e.config_mut().plus = true;
    let (adv, _) = e.evaluate(&model, &x, &y, 250).unwrap();
    assert_eq!(adv.shape(), x.shape());
    assert_eq!(
        e.reconcile_plan(),
        vec![
            StageKind::GradCe,
            StageKind::GradTargeted,
            StageKind::BoundaryTargeted,
        ]
    );
}

#[test]
fn wall_clock_seeding_still_produces_valid_runs() {
    let model = SignModel;
    let x = arr2(&[[0.05_f32], [2.0]]).into_dyn();
    let y = [0, 0];
    let mut e = AttackEnsemble::new(EnsembleConfig {
        epsilon: 0.4,
        seed: None,
        verbose: false,
        stages: vec![StageKind::GradCe],
        ..EnsembleConfig::default()
    })
    .unwrap();
    e.cheap();

    let (adv, robust) = e.evaluate(&model, &x, &y, 250).unwrap();
    // The weak sample falls, the strong one stands, whatever the draws.
    assert!((robust - 0.5).abs() < 1e-6);
    assert!(Norm::Linf.row_distances(&x, &adv)[0] <= 0.4 + 1e-4);
}

#[test]
fn inference_failure_propagates_through_evaluate() {
    struct FailingModel;
    impl Model for FailingModel {
        fn predict(&self, _batch: &ArrayD<f32>) -> Result<Array2<f32>> {
            Err(GauntletError::Inference("backend down".into()))
        }
    }

    let x = arr2(&[[0.1_f32]]).into_dyn();
    let mut e = ensemble(vec![StageKind::GradCe], 0.3);
    let err = e.evaluate(&FailingModel, &x, &[0], 250).unwrap_err();
    assert!(matches!(err, GauntletError::Inference(_)));
}
