//! Integration tests for the `ef_search` bandit's training and
//! acceptance-gated retraining cycle.

use rvf::{AcceptanceConfig, Context, EfSearchPolicy, ARMS};

#[test]
fn test_select_arm_explores_every_cell_before_exploiting() {
    let policy = EfSearchPolicy::new(ARMS);
    let mut seen = std::collections::HashSet::new();
    for _ in 0..ARMS.len() {
        let arm = policy.select_arm(Context::Wide).unwrap();
        seen.insert(arm);
        policy.record_outcome(Context::Wide, arm, true, arm as f32 / 50.0).unwrap();
    }
    assert_eq!(seen.len(), ARMS.len(), "every arm must be explored once before exploitation");
}

#[test]
fn test_train_is_deterministic_given_a_seed() {
    let a = EfSearchPolicy::new(ARMS);
    let b = EfSearchPolicy::new(ARMS);

    let summary_a = a.train(200, 0.0, 1.0, Some(42)).unwrap();
    let summary_b = b.train(200, 0.0, 1.0, Some(42)).unwrap();

    assert_eq!(summary_a.episodes, summary_b.episodes);
    assert!((summary_a.success_rate - summary_b.success_rate).abs() < 1e-6);

    for ctx in [Context::Narrow, Context::Medium, Context::Wide] {
        for arm in ARMS {
            assert_eq!(
                a.cell(ctx, arm).map(|c| c.attempts),
                b.cell(ctx, arm).map(|c| c.attempts),
            );
        }
    }
}

#[test]
fn test_acceptance_cycle_produces_a_report_with_sane_bounds() {
    let policy = EfSearchPolicy::new(ARMS);
    let report = policy.acceptance(AcceptanceConfig::default(), Some(7)).unwrap();

    assert!(report.mode_a.accuracy >= 0.0 && report.mode_a.accuracy <= 1.0);
    assert!(report.mode_b.accuracy >= 0.0 && report.mode_b.accuracy <= 1.0);
    assert!(report.mode_c.accuracy >= 0.0 && report.mode_c.accuracy <= 1.0);
    assert!(report.mode_c.accuracy_under_noise >= 0.0 && report.mode_c.accuracy_under_noise <= 1.0);
    assert!(report.dimensions_improved <= 3);
    assert_eq!(
        report.accepted,
        report.accuracy_maintained && report.zero_violations && report.dimensions_improved >= 2
    );
}

#[test]
fn test_acceptance_is_reproducible_with_same_seed() {
    let a = EfSearchPolicy::new(ARMS);
    let b = EfSearchPolicy::new(ARMS);

    let report_a = a.acceptance(AcceptanceConfig::default(), Some(99)).unwrap();
    let report_b = b.acceptance(AcceptanceConfig::default(), Some(99)).unwrap();

    assert_eq!(report_a.accepted, report_b.accepted);
    assert_eq!(report_a.dimensions_improved, report_b.dimensions_improved);
}
