//! Delete path: unlink, re-parent, reclaim

mod common;

use common::{age_sex, fixture};
use simvault::{AccumulatorCell, DbError, ExpressionCell, MicrodataRow, RunStatus, Value, ValueTypeKey};

#[tokio::test]
async fn test_delete_root_reparents_to_smallest_dependent() {
    let fx = fixture().await;
    let key = ValueTypeKey::parameter(fx.param);
    let root = fx.done_run("root").await;
    let d1 = fx.done_run("d1").await;
    let d2 = fx.done_run("d2").await;

    // d2 writes before d1 so dependency order is not insertion order.
    fx.store.write_parameter(root, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    fx.store.write_parameter(d2, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    fx.store.write_parameter(d1, fx.param, age_sex(1.0, 2.0)).await.unwrap();

    fx.store.delete_run(root).await.unwrap();

    assert_eq!(fx.store.resolve_physical_owner(d1, key).await.unwrap(), d1);
    assert_eq!(fx.store.resolve_physical_owner(d2, key).await.unwrap(), d1);
    assert_eq!(fx.store.physical_row_count(key, d1).await.unwrap(), 2);
    assert_eq!(fx.store.physical_row_count(key, root).await.unwrap(), 0);
    assert_eq!(fx.store.read_parameter(d2, fx.param).await.unwrap(), age_sex(1.0, 2.0));
    fx.store.verify().await.unwrap();

    // The class is still addressable: a new writer attaches to the new root.
    let late = fx.done_run("late").await;
    let outcome = fx.store.write_parameter(late, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    assert_eq!(outcome.base_run_id, d1);
}

#[tokio::test]
async fn test_delete_root_skips_unlinked_dependent() {
    let fx = fixture().await;
    let key = ValueTypeKey::parameter(fx.param);
    let root = fx.done_run("root").await;
    let leaf = fx.done_run("leaf").await;
    let live = fx.done_run("live").await;
    for run in [root, leaf, live] {
        fx.store.write_parameter(run, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    }

    // leaf has the smallest dependent id but is already unlinked.
    fx.store.unlink_run(leaf).await.unwrap();
    let report = fx.store.delete_run(root).await.unwrap();
    assert_eq!(report.unlink.reparented.len(), 1);
    assert_eq!(report.unlink.reparented[0].new_root, live);
    assert_eq!(report.unlink.reparented[0].bindings_rebased, 3);

    assert_eq!(fx.store.resolve_physical_owner(live, key).await.unwrap(), live);
    assert_eq!(fx.store.physical_row_count(key, live).await.unwrap(), 2);
    assert_eq!(fx.store.physical_row_count(key, leaf).await.unwrap(), 0);
    fx.store.verify().await.unwrap();

    let body = fx.store.delete_run_body(leaf).await.unwrap();
    assert_eq!(body.rows_deleted, 0);
    assert_eq!(body.bindings_removed, 1);
    fx.store.delete_run_meta(leaf).await.unwrap();
    assert!(matches!(fx.store.run(leaf).await, Err(DbError::NotFound(_))));
    fx.store.verify().await.unwrap();

    let late = fx.done_run("late").await;
    let outcome = fx.store.write_parameter(late, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    assert_eq!(outcome.base_run_id, live);
    assert_eq!(fx.store.physical_row_total(key).await.unwrap(), 2);
}

#[tokio::test]
async fn test_delete_root_with_only_unlinked_dependents() {
    let fx = fixture().await;
    let key = ValueTypeKey::parameter(fx.param);
    let root = fx.done_run("root").await;
    let leaf = fx.done_run("leaf").await;
    fx.store.write_parameter(root, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    fx.store.write_parameter(leaf, fx.param, age_sex(1.0, 2.0)).await.unwrap();

    fx.store.unlink_run(leaf).await.unwrap();
    let report = fx.store.delete_run(root).await.unwrap();
    assert!(report.unlink.reparented.is_empty());
    fx.store.verify().await.unwrap();

    // Nothing live holds the content, so an identical write starts afresh.
    let next = fx.done_run("next").await;
    let outcome = fx.store.write_parameter(next, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    assert!(outcome.is_root());
    fx.store.verify().await.unwrap();

    let report = fx.store.delete_run(leaf).await.unwrap();
    assert!(report.unlink.already_unlinked);
    assert_eq!(report.body.rows_deleted, 2);
    assert_eq!(fx.store.physical_row_total(key).await.unwrap(), 2);
    assert_eq!(fx.store.physical_row_count(key, next).await.unwrap(), 2);
    fx.store.verify().await.unwrap();
}

#[tokio::test]
async fn test_delete_output_table_root_moves_both_tables() {
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

    let root = fx.done_run("root").await;
    let d1 = fx.done_run("d1").await;
    let d2 = fx.done_run("d2").await;
    for run in [root, d2, d1] {
        fx.store
            .write_output_table(run, fx.table, accumulators.clone(), expressions.clone())
            .await
            .unwrap();
    }

    let report = fx.store.delete_run(root).await.unwrap();
    assert_eq!(report.unlink.reparented[0].new_root, d1);
    assert_eq!(report.unlink.reparented[0].rows_moved, 5);

    let state = fx.store.snapshot().await;
    let tables = state.physical_tables(key).unwrap();
    assert_eq!(tables.len(), 2);
    let per_table: Vec<(usize, usize)> = tables
        .iter()
        .map(|name| {
            let table = state.table(name).unwrap();
            (table.scan_run(d1).len(), table.scan_run(root).len())
        })
        .collect();
    assert_eq!(per_table, vec![(3, 0), (2, 0)]);

    assert_eq!(fx.store.physical_row_count(key, d1).await.unwrap(), 5);
    assert_eq!(fx.store.physical_row_total(key).await.unwrap(), 5);
    assert_eq!(fx.store.resolve_physical_owner(d2, key).await.unwrap(), d1);
    let values = fx.store.read_output_table(d2, fx.table).await.unwrap();
    assert_eq!(values.accumulators, accumulators);
    assert_eq!(values.expressions, expressions);
    fx.store.verify().await.unwrap();
}

#[tokio::test]
async fn test_deleting_leaf_leaves_physical_rows_alone() {
    let fx = fixture().await;
    let key = ValueTypeKey::parameter(fx.param);
    let root = fx.done_run("root").await;
    let leaf = fx.done_run("leaf").await;
    fx.store.write_parameter(root, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    fx.store.write_parameter(leaf, fx.param, age_sex(1.0, 2.0)).await.unwrap();

    let report = fx.store.delete_run(leaf).await.unwrap();
    assert!(report.unlink.reparented.is_empty());
    assert_eq!(report.body.rows_deleted, 0);
    assert_eq!(report.body.bindings_removed, 1);

    assert_eq!(fx.store.physical_row_count(key, root).await.unwrap(), 2);
    assert_eq!(fx.store.physical_row_total(key).await.unwrap(), 2);
    assert_eq!(fx.store.resolve_physical_owner(root, key).await.unwrap(), root);
}

#[tokio::test]
async fn test_deleting_sole_owner_drops_rows() {
    let fx = fixture().await;
    let key = ValueTypeKey::parameter(fx.param);
    let run = fx.done_run("only").await;
    fx.store.write_parameter(run, fx.param, age_sex(1.0, 2.0)).await.unwrap();

    let report = fx.store.delete_run(run).await.unwrap();
    assert_eq!(report.body.rows_deleted, 2);
    assert_eq!(fx.store.physical_row_total(key).await.unwrap(), 0);

    // Same content written again is materialized afresh.
    let next = fx.done_run("next").await;
    let outcome = fx.store.write_parameter(next, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    assert!(outcome.is_root());
    assert_eq!(outcome.rows_written, 2);
}

#[tokio::test]
async fn test_unlink_twice_is_a_no_op() {
    let fx = fixture().await;
    let root = fx.done_run("root").await;
    let dep = fx.done_run("dep").await;
    fx.store.write_parameter(root, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    fx.store.write_parameter(dep, fx.param, age_sex(1.0, 2.0)).await.unwrap();

    let first = fx.store.unlink_run(root).await.unwrap();
    assert!(!first.already_unlinked);
    assert_eq!(first.reparented.len(), 1);
    let before = fx.store.snapshot().await;

    let second = fx.store.unlink_run(root).await.unwrap();
    assert!(second.already_unlinked);
    assert!(second.reparented.is_empty());

    let after = fx.store.snapshot().await;
    assert_eq!(after.run(root).unwrap(), before.run(root).unwrap());
    assert_eq!(
        after.physical_row_count(ValueTypeKey::parameter(fx.param), dep).unwrap(),
        before.physical_row_count(ValueTypeKey::parameter(fx.param), dep).unwrap()
    );
}

#[tokio::test]
async fn test_unlinked_run_is_tombstoned() {
    let fx = fixture().await;
    let run = fx.done_run("doomed").await;
    fx.store.write_parameter(run, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    fx.store.finalize_run_digest(run).await.unwrap();

    fx.store.unlink_run(run).await.unwrap();
    let record = fx.store.run(run).await.unwrap();
    let tombstone = format!("deleted_{}", run);
    assert_eq!(record.status, RunStatus::Deleted);
    assert_eq!(record.name, tombstone);
    assert_eq!(record.run_digest.as_deref(), Some(tombstone.as_str()));

    let binding = fx.store.binding(run, ValueTypeKey::parameter(fx.param)).await.unwrap();
    assert_eq!(binding.digest, tombstone);

    // A tombstoned run can never be a dedup target.
    let other = fx.done_run("other").await;
    let outcome = fx.store.write_parameter(other, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    assert_eq!(outcome.base_run_id, other);
}

#[tokio::test]
async fn test_meta_delete_refuses_while_bindings_remain() {
    let fx = fixture().await;
    let run = fx.done_run("partial").await;
    fx.store.write_parameter(run, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    fx.store.set_run_option(run, "Parameter.ageSex", "csv").await.unwrap();

    fx.store.unlink_run(run).await.unwrap();
    let err = fx.store.delete_run_meta(run).await.unwrap_err();
    assert!(err.is_integrity());
    assert!(!err.is_precondition());

    let record = fx.store.run(run).await.unwrap();
    assert_eq!(record.status, RunStatus::Deleted);
    assert_eq!(fx.store.run_options(run).await.unwrap().len(), 1);

    fx.store.delete_run_body(run).await.unwrap();
    let meta = fx.store.delete_run_meta(run).await.unwrap();
    assert_eq!(meta.options_removed, 1);
    assert!(matches!(fx.store.run(run).await, Err(DbError::NotFound(_))));
}

#[tokio::test]
async fn test_body_delete_requires_unlink() {
    let fx = fixture().await;
    let run = fx.done_run("live").await;
    let err = fx.store.delete_run_body(run).await.unwrap_err();
    assert!(matches!(err, DbError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_delete_rejects_unfinished_and_missing_runs() {
    let fx = fixture().await;
    let run = fx.store.create_run(fx.model.model_id, "running", 1).await.unwrap();
    fx.store.update_run_status(run.run_id, RunStatus::Progress).await.unwrap();

    let err = fx.store.delete_run(run.run_id).await.unwrap_err();
    assert!(matches!(err, DbError::PreconditionFailed(_)));
    assert_eq!(fx.store.run(run.run_id).await.unwrap().status, RunStatus::Progress);

    let err = fx.store.delete_run(9_999).await.unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_twice_fails_the_second_time() {
    let fx = fixture().await;
    let run = fx.done_run("once").await;
    fx.store.delete_run(run).await.unwrap();
    assert!(matches!(fx.store.delete_run(run).await, Err(DbError::NotFound(_))));
}

#[tokio::test]
async fn test_last_generation_reference_drops_its_table() {
    let fx = fixture().await;
    let rows = vec![MicrodataRow::new(1, vec![Value::Integer(30)])];
    let a = fx.done_run("a").await;
    let b = fx.done_run("b").await;
    let outcome = fx.store.write_microdata(a, fx.entity, vec![0], rows.clone()).await.unwrap();
    fx.store.write_microdata(b, fx.entity, vec![0], rows.clone()).await.unwrap();
    let generation = outcome.key.hid;
    let tables_before = fx.store.stats().await.physical_tables;

    let first = fx.store.delete_run(a).await.unwrap();
    assert!(first.body.generations_dropped.is_empty());
    assert_eq!(fx.store.read_microdata(b, generation).await.unwrap(), rows);

    let second = fx.store.delete_run(b).await.unwrap();
    assert_eq!(second.body.generations_dropped, vec![generation]);

    let stats = fx.store.stats().await;
    assert_eq!(stats.generations, 0);
    assert_eq!(stats.physical_tables, tables_before - 1);
}

#[tokio::test]
async fn test_delete_clears_workset_base() {
    let fx = fixture().await;
    let run = fx.done_run("base").await;
    let workset = fx
        .store
        .create_workset(fx.model.model_id, "scenario", Some(run))
        .await
        .unwrap();

    let report = fx.store.delete_run(run).await.unwrap();
    assert_eq!(report.unlink.worksets_cleared, 1);
    assert_eq!(fx.store.workset(workset.workset_id).await.unwrap().base_run_id, None);
}

#[tokio::test]
async fn test_failed_delete_rolls_back() {
    let fx = fixture().await;
    let key = ValueTypeKey::parameter(fx.param);
    let run = fx.done_run("root").await;
    let dep = fx.done_run("dep").await;
    fx.store.write_parameter(run, fx.param, age_sex(1.0, 2.0)).await.unwrap();
    fx.store.write_parameter(dep, fx.param, age_sex(1.0, 2.0)).await.unwrap();

    // Body before unlink fails and must leave the root in place.
    assert!(fx.store.delete_run_body(run).await.is_err());
    assert_eq!(fx.store.resolve_physical_owner(dep, key).await.unwrap(), run);
    assert_eq!(fx.store.run(run).await.unwrap().status, RunStatus::Done);
}
