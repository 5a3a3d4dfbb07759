//! Write path: content-addressed sharing of run values

mod common;

use common::{age_sex, fixture, fixture_on};
use simvault::{
    AccumulatorCell, DbError, ExpressionCell, FloatFormat, MicrodataRow, ParameterCell, RunStatus,
    RunStore, StoreConfig, Value, ValueTypeKey, WriteDisposition,
};

#[tokio::test]
async fn test_end_to_end_runs_10_11_12() {
    let fx = fixture().await;
    fx.skip_to_run(10).await;
    let key = ValueTypeKey::parameter(fx.param);

    let r10 = fx.done_run("first").await;
    let r11 = fx.done_run("second").await;
    let r12 = fx.done_run("third").await;
    assert_eq!((r10, r11, r12), (10, 11, 12));

    let w10 = fx.store.write_parameter(r10, fx.param, age_sex(1.5, 2.5)).await.unwrap();
    assert_eq!(w10.disposition, WriteDisposition::Materialized);
    assert_eq!(w10.rows_written, 2);

    let w11 = fx.store.write_parameter(r11, fx.param, age_sex(1.5, 2.5)).await.unwrap();
    assert_eq!(w11.disposition, WriteDisposition::Attached);
    assert_eq!(w11.base_run_id, 10);
    assert_eq!(w11.rows_written, 0);
    assert_eq!(fx.store.physical_row_total(key).await.unwrap(), 2);

    let w12 = fx.store.write_parameter(r12, fx.param, age_sex(1.5, 3.5)).await.unwrap();
    assert_eq!(w12.disposition, WriteDisposition::Materialized);
    assert_ne!(w12.digest, w10.digest);
    assert_eq!(fx.store.physical_row_total(key).await.unwrap(), 4);

    let report = fx.store.delete_run(r10).await.unwrap();
    assert_eq!(report.unlink.reparented.len(), 1);
    assert_eq!(report.unlink.reparented[0].new_root, 11);
    assert_eq!(report.unlink.reparented[0].rows_moved, 2);

    assert_eq!(fx.store.resolve_physical_owner(r11, key).await.unwrap(), 11);
    assert_eq!(fx.store.resolve_physical_owner(r12, key).await.unwrap(), 12);
    assert_eq!(fx.store.physical_row_count(key, 10).await.unwrap(), 0);
    assert_eq!(fx.store.physical_row_count(key, 11).await.unwrap(), 2);
    assert_eq!(fx.store.physical_row_count(key, 12).await.unwrap(), 2);
    assert_eq!(fx.store.read_parameter(r11, fx.param).await.unwrap(), age_sex(1.5, 2.5));
    assert_eq!(fx.store.read_parameter(r12, fx.param).await.unwrap(), age_sex(1.5, 3.5));
    assert!(matches!(fx.store.run(r10).await, Err(DbError::NotFound(_))));
    fx.store.verify().await.unwrap();
}

#[tokio::test]
async fn test_identical_content_has_one_physical_copy() {
    let fx = fixture().await;
    let key = ValueTypeKey::parameter(fx.param);

    let mut runs = Vec::new();
    for i in 0..5 {
        let run = fx.done_run(&format!("run_{}", i)).await;
        fx.store.write_parameter(run, fx.param, age_sex(0.25, 0.75)).await.unwrap();
        runs.push(run);
    }

    let owners: Vec<_> = futures::future::join_all(
        runs.iter().map(|run| fx.store.resolve_physical_owner(*run, key)),
    )
    .await
    .into_iter()
    .map(|owner| owner.unwrap())
    .collect();
    assert!(owners.iter().all(|owner| *owner == runs[0]));
    assert_eq!(fx.store.physical_row_total(key).await.unwrap(), 2);

    let stats = fx.store.stats().await;
    assert_eq!(stats.shared_bindings(), 4);
    assert_eq!(stats.runs_with_status(RunStatus::Done), 5);
}

#[tokio::test]
async fn test_smaller_run_adopts_existing_content() {
    let fx = fixture().await;
    let key = ValueTypeKey::parameter(fx.param);
    let early = fx.done_run("early").await;
    let middle = fx.done_run("middle").await;
    let late = fx.done_run("late").await;

    // Completion order differs from run id order.
    fx.store.write_parameter(late, fx.param, age_sex(4.0, 5.0)).await.unwrap();
    fx.store.write_parameter(middle, fx.param, age_sex(4.0, 5.0)).await.unwrap();
    assert_eq!(fx.store.resolve_physical_owner(late, key).await.unwrap(), middle);

    let outcome = fx.store.write_parameter(early, fx.param, age_sex(4.0, 5.0)).await.unwrap();
    assert_eq!(outcome.disposition, WriteDisposition::Adopted);
    assert_eq!(outcome.rows_rehomed, 2);
    assert_eq!(outcome.bindings_rebased, 2);

    for run in [early, middle, late] {
        assert_eq!(fx.store.resolve_physical_owner(run, key).await.unwrap(), early);
    }
    assert_eq!(fx.store.physical_row_count(key, early).await.unwrap(), 2);
    assert_eq!(fx.store.physical_row_total(key).await.unwrap(), 2);
    fx.store.verify().await.unwrap();
}

#[tokio::test]
async fn test_digest_is_order_sensitive() {
    let fx = fixture().await;
    let a = fx.done_run("a").await;
    let b = fx.done_run("b").await;

    let mut reversed = age_sex(1.0, 2.0);
    reversed.reverse();

    let wa = fx.store.write_parameter(a, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    let wb = fx.store.write_parameter(b, fx.param, reversed).await.unwrap();
    assert_ne!(wa.digest, wb.digest);
    assert_eq!(wb.disposition, WriteDisposition::Materialized);
}

#[tokio::test]
async fn test_output_table_shares_both_physical_tables() {
    let fx = fixture().await;
    let key = ValueTypeKey::output_table(fx.table);
    let accumulators = vec![
        AccumulatorCell::new(0, 0, vec![0], 10.0),
        AccumulatorCell::new(0, 0, vec![1], 20.0),
        AccumulatorCell::new(1, 0, vec![0], 1.0),
    ];
    let expressions = vec![
        ExpressionCell::new(0, vec![0], 10.0),
        ExpressionCell::new(1, vec![1], Value::Null),
    ];

    let a = fx.done_run("a").await;
    let b = fx.done_run("b").await;
    fx.store
        .write_output_table(a, fx.table, accumulators.clone(), expressions.clone())
        .await
        .unwrap();
    let outcome = fx
        .store
        .write_output_table(b, fx.table, accumulators.clone(), expressions.clone())
        .await
        .unwrap();
    assert_eq!(outcome.base_run_id, a);
    assert_eq!(fx.store.physical_row_total(key).await.unwrap(), 5);

    let values = fx.store.read_output_table(b, fx.table).await.unwrap();
    assert_eq!(values.accumulators, accumulators);
    assert_eq!(values.expressions, expressions);
}

#[tokio::test]
async fn test_output_table_rejects_unknown_accumulator() {
    let fx = fixture().await;
    let run = fx.done_run("a").await;
    let err = fx
        .store
        .write_output_table(run, fx.table, vec![AccumulatorCell::new(7, 0, vec![0], 1.0)], vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_microdata_shares_generation() {
    let fx = fixture().await;
    let rows = vec![
        MicrodataRow::new(1, vec![Value::Integer(30), Value::Float(1200.5)]),
        MicrodataRow::new(2, vec![Value::Integer(71), Value::Float(800.0)]),
    ];

    let a = fx.done_run("a").await;
    let b = fx.done_run("b").await;
    let wa = fx.store.write_microdata(a, fx.entity, vec![0, 1], rows.clone()).await.unwrap();
    let wb = fx.store.write_microdata(b, fx.entity, vec![0, 1], rows.clone()).await.unwrap();

    assert_eq!(wa.key, wb.key);
    assert_eq!(wb.disposition, WriteDisposition::Attached);
    let generation = wa.key.hid;
    assert_eq!(fx.store.run_generations(b, fx.entity).await.unwrap(), vec![generation]);
    assert_eq!(fx.store.read_microdata(b, generation).await.unwrap(), rows);
    assert_eq!(fx.store.stats().await.generations, 1);
}

#[tokio::test]
async fn test_different_attribute_sets_are_different_generations() {
    let fx = fixture().await;
    let a = fx.done_run("a").await;
    let b = fx.done_run("b").await;

    let wa = fx
        .store
        .write_microdata(a, fx.entity, vec![0], vec![MicrodataRow::new(1, vec![Value::Integer(30)])])
        .await
        .unwrap();
    let wb = fx
        .store
        .write_microdata(
            b,
            fx.entity,
            vec![0, 2],
            vec![MicrodataRow::new(1, vec![Value::Integer(30), Value::Boolean(false)])],
        )
        .await
        .unwrap();
    assert_ne!(wa.key.hid, wb.key.hid);
    assert_eq!(fx.store.stats().await.generations, 2);
}

#[tokio::test]
async fn test_microdata_attribute_ids_must_ascend() {
    let fx = fixture().await;
    let run = fx.done_run("a").await;
    let err = fx
        .store
        .write_microdata(
            run,
            fx.entity,
            vec![1, 0],
            vec![MicrodataRow::new(1, vec![Value::Float(1.0), Value::Integer(2)])],
        )
        .await
        .unwrap_err();
    assert!(err.is_precondition());
}

#[tokio::test]
async fn test_write_requires_completed_run() {
    let fx = fixture().await;
    let run = fx.store.create_run(fx.model.model_id, "running", 1).await.unwrap();
    fx.store.update_run_status(run.run_id, RunStatus::Progress).await.unwrap();

    let err = fx
        .store
        .write_parameter(run.run_id, fx.param, age_sex(1.0, 2.0))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::PreconditionFailed(_)));
    assert_eq!(fx.store.stats().await.physical_rows, 0);
}

#[tokio::test]
async fn test_second_write_of_same_value_type_fails() {
    let fx = fixture().await;
    let run = fx.done_run("a").await;
    fx.store.write_parameter(run, fx.param, age_sex(1.0, 2.0)).await.unwrap();

    let err = fx
        .store
        .write_parameter(run, fx.param, age_sex(1.0, 2.0))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::AlreadyBound { .. }));
    assert!(err.is_precondition());
    assert_eq!(fx.store.physical_row_total(ValueTypeKey::parameter(fx.param)).await.unwrap(), 2);
}

#[tokio::test]
async fn test_unsupported_value_fails_without_partial_effect() {
    let fx = fixture().await;
    let run = fx.done_run("a").await;
    let cells = vec![ParameterCell::new(0, vec![0, 0], "not a number")];

    let err = fx.store.write_parameter(run, fx.param, cells).await.unwrap_err();
    assert!(matches!(err, DbError::Digest(_)));
    assert!(
        fx.store
            .binding(run, ValueTypeKey::parameter(fx.param))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_run_digest_follows_values() {
    let fx = fixture().await;
    let a = fx.done_run("a").await;
    let b = fx.done_run("b").await;
    fx.store.write_parameter(a, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    fx.store.write_parameter(b, fx.param, age_sex(1.0, 2.0)).await.unwrap();

    let ra = fx.store.finalize_run_digest(a).await.unwrap();
    let rb = fx.store.finalize_run_digest(b).await.unwrap();
    assert!(ra.run_digest.is_some());
    assert_eq!(ra.value_digest, rb.value_digest);
    assert_eq!(ra.run_digest, rb.run_digest);
}

#[tokio::test]
async fn test_fixed_float_format_merges_rounded_values() {
    let config = StoreConfig::new().float_format(FloatFormat::Fixed(1));
    let fx = fixture_on(RunStore::open(config).await.unwrap()).await;
    let a = fx.done_run("a").await;
    let b = fx.done_run("b").await;

    fx.store.write_parameter(a, fx.param, age_sex(1.01, 2.04)).await.unwrap();
    let outcome = fx.store.write_parameter(b, fx.param, age_sex(1.04, 2.01)).await.unwrap();
    assert_eq!(outcome.disposition, WriteDisposition::Attached);

    // Readers see the root's values.
    assert_eq!(fx.store.read_parameter(b, fx.param).await.unwrap(), age_sex(1.01, 2.04));

    let exact = fixture().await;
    let c = exact.done_run("c").await;
    let d = exact.done_run("d").await;
    exact.store.write_parameter(c, exact.param, age_sex(1.01, 2.04)).await.unwrap();
    let outcome = exact.store.write_parameter(d, exact.param, age_sex(1.04, 2.01)).await.unwrap();
    assert_eq!(outcome.disposition, WriteDisposition::Materialized);
}
