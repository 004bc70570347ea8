// Status transitions, rejection paths and registry consistency.

mod common;

use common::*;
use model_host::{row, DataSourceRef, LoadError, ModelStatus, Options, RowSet, RuntimeError, SourceError};
use std::sync::Arc;

#[tokio::test]
async fn package_missing_capabilities_is_not_registered() {
    let h = harness().await;
    let pkg = zip_of(&[("model.yaml", "runtime: process\ncommand: [sh, model.sh]\ncapabilities: [setup, predict]\n")]);
    let err = h.host.upload("partial", pkg).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Load(LoadError::MissingCapability(ref caps)) if caps.len() == 1));
    assert_eq!(err.status_code(), 400);
    assert!(h.host.list().is_empty());
    assert_eq!(package_dirs(&h), 0);
}

#[tokio::test]
async fn package_with_two_entries_is_ambiguous() {
    let h = harness().await;
    let pkg = zip_of(&[("a/model.yaml", LINEAR_MANIFEST), ("b/model.yml", LINEAR_MANIFEST)]);
    let err = h.host.upload("twice", pkg).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Load(LoadError::EntryAmbiguous(_))));
    assert!(h.host.describe("twice").is_err());
}

#[tokio::test]
async fn predicting_before_training_is_a_conflict() {
    let h = harness().await;
    h.host.upload("fresh", linear_package()).await.unwrap();
    let err = h.host.predict_rows("fresh", &RowSet::single(row! {"initial_price" => 1_i64}), &Options::new()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::NotTrained { status: ModelStatus::Uploaded, .. }));
    assert_eq!(err.status_code(), 409);
    let err = h.host.predict_datasource("fresh", &DataSourceRef::from("hr"), &Options::new()).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn failed_fit_clears_previous_training() {
    let h = harness().await;
    h.host.upload("lin", linear_package()).await.unwrap();
    h.host.train("lin", &DataSourceRef::from("hr"), "rental_price", &Options::new()).await.unwrap();

    // Constant feature makes the normal equations singular.
    let flat: RowSet = (0..20_i64).map(|i| row! {"initial_price" => 5_i64, "rental_price" => i}).collect();
    let err = h.host.train("lin", &DataSourceRef::Inline(flat), "rental_price", &Options::new()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Train { .. }));
    assert_eq!(err.status_code(), 422);

    let summary = h.host.describe("lin").unwrap();
    assert_eq!(summary.status, ModelStatus::Failed);
    assert!(summary.last_error.is_some());
    let err = h.host.predict_rows("lin", &RowSet::single(row! {"initial_price" => 1_i64}), &Options::new()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::NotTrained { status: ModelStatus::Failed, .. }));

    h.host.train("lin", &DataSourceRef::from("hr"), "rental_price", &Options::new()).await.unwrap();
    assert_eq!(h.host.describe("lin").unwrap().status, ModelStatus::Trained);
}

#[tokio::test]
async fn source_errors_pass_through_and_leave_status_alone() {
    let h = harness().await;
    h.host.upload("lin", linear_package()).await.unwrap();
    let err = h.host.train("lin", &DataSourceRef::from("nope"), "rental_price", &Options::new()).await.unwrap_err();
    match &err {
        RuntimeError::Source(SourceError::NotFound(name)) => assert_eq!(name, "nope"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(err.status_code(), 404);
    assert_eq!(h.host.describe("lin").unwrap().status, ModelStatus::Uploaded);
}

#[tokio::test]
async fn bad_requests_are_rejected_up_front() {
    let h = harness().await;
    assert_eq!(h.host.upload("../escape", linear_package()).await.unwrap_err().status_code(), 400);
    assert_eq!(h.host.upload("", linear_package()).await.unwrap_err().status_code(), 400);
    assert_eq!(h.host.train("ghost", &DataSourceRef::from("hr"), "rental_price", &Options::new()).await.unwrap_err().status_code(), 404);

    h.host.upload("lin", linear_package()).await.unwrap();
    let err = h.host.train("lin", &DataSourceRef::from("hr"), "no_such_column", &Options::new()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidRequest(_)));
    let err = h.host.train("lin", &DataSourceRef::Inline(RowSet::new()), "rental_price", &Options::new()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidRequest(_)));
    assert_eq!(h.host.describe("lin").unwrap().status, ModelStatus::Uploaded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reuploads_keep_a_single_entry() {
    let h = Arc::new(harness().await);
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            h.host.upload("contended", linear_package()).await.unwrap().version
        }));
    }
    let mut versions = Vec::new();
    for t in tasks { versions.push(t.await.unwrap()); }
    versions.sort_unstable();
    assert_eq!(versions, (1..=8).collect::<Vec<u64>>());

    let summary = h.host.describe("contended").unwrap();
    assert_eq!(summary.version, 8);
    assert_eq!(h.host.registry().len(), 1);
    assert_eq!(package_dirs(&h), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_predictions_on_one_instance_agree() {
    let h = Arc::new(harness().await);
    h.host.upload("lin", linear_package()).await.unwrap();
    h.host.train("lin", &DataSourceRef::from("hr"), "rental_price", &Options::new()).await.unwrap();
    let when = RowSet::single(row! {"initial_price" => 4000_i64});
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let (h, when) = (h.clone(), when.clone());
        tasks.push(tokio::spawn(async move { h.host.predict_rows("lin", &when, &Options::new()).await.unwrap() }));
    }
    let first = tasks.remove(0).await.unwrap();
    for t in tasks { assert_eq!(t.await.unwrap(), first); }
}

#[tokio::test]
async fn versions_keep_counting_after_delete() {
    let h = harness().await;
    assert_eq!(h.host.upload("lin", linear_package()).await.unwrap().version, 1);
    h.host.delete("lin").await.unwrap();
    assert_eq!(h.host.upload("lin", linear_package()).await.unwrap().version, 2);
    assert_eq!(h.host.upload("other", linear_package()).await.unwrap().version, 1);
}
