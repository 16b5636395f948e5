mod common;

use common::{engine_config, jittery_pool, pool, verdicts};
use isocop_core::fault::ErrorKind;
use isocop_core::scenario::builtin;
use isocop_core::session::SessionId::{A, B};
use isocop_core::IsolationLevel::{ReadCommitted, ReadUncommitted, RepeatableRead, Serializable};
use isocop_core::Verdict::{AnomalyObserved as Observed, AnomalyPrevented as Prevented};
use isocop_core::{run_all_scenarios, run_scenario, Dialect, Value};

#[test]
fn postgres_matrix() {
    let pool = pool(Dialect::Postgres);
    let reports = run_all_scenarios(&pool, engine_config()).unwrap();
    let expected = [
        ("lost-update", [Observed, Prevented, Prevented]),
        ("dirty-read", [Prevented, Prevented, Prevented]),
        ("non-repeatable-read", [Observed, Prevented, Prevented]),
        ("phantom-read", [Observed, Prevented, Prevented]),
    ];
    for (name, outcomes) in expected {
        let got = verdicts(&reports[name]);
        let want: Vec<_> = [ReadCommitted, RepeatableRead, Serializable]
            .into_iter()
            .zip(outcomes)
            .collect();
        assert_eq!(got, want, "{name}");
    }
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn mysql_matrix() {
    let pool = pool(Dialect::MySql);
    let reports = run_all_scenarios(&pool, engine_config()).unwrap();
    let expected = [
        ("lost-update", [Observed, Observed, Observed, Observed]),
        ("dirty-read", [Observed, Prevented, Prevented, Prevented]),
        ("non-repeatable-read", [Observed, Observed, Prevented, Prevented]),
        ("phantom-read", [Observed, Observed, Prevented, Prevented]),
    ];
    for (name, outcomes) in expected {
        let got = verdicts(&reports[name]);
        let want: Vec<_> = [ReadUncommitted, ReadCommitted, RepeatableRead, Serializable]
            .into_iter()
            .zip(outcomes)
            .collect();
        assert_eq!(got, want, "{name}");
    }
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn postgres_snapshot_levels_reject_the_second_writer() {
    let pool = pool(Dialect::Postgres);
    let reports = run_scenario(&pool, builtin::LOST_UPDATE, engine_config()).unwrap();
    for report in reports.iter().filter(|r| r.isolation_level() != ReadCommitted) {
        assert_eq!(report.capture("init"), Some(&Value::Int(100)));
        assert_eq!(report.capture("final"), Some(&Value::Int(110)));
        let rejected: Vec<_> = report.failed_steps().collect();
        assert_eq!(rejected[0].session(), B);
        assert_eq!(rejected[0].error_kind(), Some(ErrorKind::SerializationConflict));
        // The failed transaction cannot commit.
        assert_eq!(rejected[1].label(), "commit");
        assert_eq!(rejected[1].error_kind(), Some(ErrorKind::TransactionAborted));
        assert!(report.failure().is_none());
    }
    assert_eq!(reports[0].capture("final"), Some(&Value::Int(130)));
}

#[test]
fn mysql_serializable_blocks_instead_of_failing() {
    let pool = pool(Dialect::MySql);
    let dirty = run_scenario(&pool, builtin::DIRTY_READ, engine_config()).unwrap();
    let serializable = dirty.last().unwrap();
    assert_eq!(serializable.isolation_level(), Serializable);
    let probe = serializable.capture_step(B, "dirty").unwrap();
    assert_eq!(probe.error_kind(), Some(ErrorKind::LockWaitTimeout));
    assert!(probe.duration_micros() >= 1_000_000);
    assert_eq!(serializable.capture("before"), Some(&Value::Int(100)));

    let uncommitted = &dirty[0];
    assert_eq!(uncommitted.capture("dirty"), Some(&Value::Int(1000)));

    let phantom = run_scenario(&pool, builtin::PHANTOM_READ, engine_config()).unwrap();
    let serializable = phantom.last().unwrap();
    let insert = serializable
        .steps(B)
        .iter()
        .find(|s| s.label() == "exec")
        .unwrap();
    assert_eq!(insert.error_kind(), Some(ErrorKind::LockWaitTimeout));
    assert_eq!(serializable.capture("c1"), serializable.capture("c2"));
}

#[test]
fn captures_show_the_anomaly() {
    let pool = pool(Dialect::MySql);
    let reports = run_scenario(&pool, builtin::NON_REPEATABLE_READ, engine_config()).unwrap();
    let committed = &reports[1];
    assert_eq!(committed.capture("r1"), Some(&Value::Int(100)));
    assert_eq!(committed.capture("r2"), Some(&Value::Int(150)));
    let repeatable = &reports[2];
    assert_eq!(repeatable.capture("r2"), Some(&Value::Int(100)));

    let reports = run_scenario(&pool, builtin::PHANTOM_READ, engine_config()).unwrap();
    assert_eq!(reports[0].capture("c1"), Some(&Value::Int(2)));
    assert_eq!(reports[0].capture("c2"), Some(&Value::Int(3)));
}

#[test]
fn runs_are_repeatable() {
    let pool = pool(Dialect::Postgres);
    let first = run_all_scenarios(&pool, engine_config()).unwrap();
    let second = run_all_scenarios(&pool, engine_config()).unwrap();
    for (name, reports) in &first {
        assert_eq!(verdicts(reports), verdicts(&second[name]), "{name}");
    }
}

#[test]
fn jitter_does_not_change_verdicts() {
    for seed in [1, 7, 1234] {
        for dialect in Dialect::ALL {
            let steady = run_scenario(&pool(dialect), builtin::LOST_UPDATE, engine_config()).unwrap();
            let shaken =
                run_scenario(&jittery_pool(dialect, seed), builtin::LOST_UPDATE, engine_config())
                    .unwrap();
            assert_eq!(verdicts(&steady), verdicts(&shaken), "{dialect} seed {seed}");
        }
    }
}

#[test]
fn dialects_run_in_parallel_on_separate_databases() {
    std::thread::scope(|s| {
        let handles: Vec<_> = Dialect::ALL
            .into_iter()
            .map(|dialect| {
                s.spawn(move || {
                    let pool = pool(dialect);
                    run_scenario(&pool, builtin::DIRTY_READ, engine_config()).unwrap()
                })
            })
            .collect();
        for handle in handles {
            let reports = handle.join().unwrap();
            let dialect = reports[0].dialect();
            assert_eq!(reports.len(), dialect.supported_levels().len());
            assert!(reports.iter().all(|r| r.failure().is_none()));
        }
    });
}

#[test]
fn steps_follow_the_choreography() {
    let pool = pool(Dialect::Postgres);
    let reports = run_scenario(&pool, builtin::NON_REPEATABLE_READ, engine_config()).unwrap();
    let report = &reports[0];
    let labels: Vec<&str> = report.steps(A).iter().map(|s| s.label()).collect();
    assert_eq!(
        labels,
        [
            "lock-timeout",
            "isolation",
            "begin",
            "query r1",
            "barrier 1",
            "barrier 2",
            "query r2",
            "commit"
        ]
    );
    assert!(report.steps(A).iter().all(|s| s.is_ok()));
    assert!(report.steps(B).iter().all(|s| s.is_ok()));
    assert_eq!(report.backend(), "sim-postgres");
}
