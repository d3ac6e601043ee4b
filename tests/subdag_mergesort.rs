// tests/subdag_mergesort.rs

use std::error::Error;

use serde_json::json;
use tokio::time::{timeout, Duration};

use hashdag::graph::{Encoding, ErrorKind, Value};
use hashdag::store::{keys, StoreExt};
use hashdag_test_utils::{init_tracing, session_on, test_session, WorkerFleet};

type TestResult = Result<(), Box<dyn Error>>;

const WAIT: Duration = Duration::from_secs(30);

#[tokio::test]
async fn recursive_mergesort_sorts_a_list() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 3);

    let input = session.put_json(&json!([5, 3, 8, 1, 9, 2, 7, 4]))?;
    let sorted = session.put_subdag(
        "mergesort",
        &[("list", input)],
        &[("sorted", Encoding::Json)],
        true,
    )?;

    timeout(WAIT, session.execute(&[sorted[0]])).await??;

    match session.fetch(&sorted[0])?.expect("sorted list ready") {
        Value::Json(v) => assert_eq!(v, json!([1, 2, 3, 4, 5, 7, 8, 9])),
        other => panic!("expected JSON, got {other:?}"),
    }

    fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn subdag_link_table_records_generated_operations() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 2);

    let input = session.put_json(&json!([2, 1]))?;
    let sorted = session.put_subdag(
        "mergesort",
        &[("list", input)],
        &[("sorted", Encoding::Json)],
        true,
    )?;

    // Recover the subdag operation hash from the artifact's parent.
    let record = hashdag::graph::get_record(session.store().as_ref(), &sorted[0].hash)?;
    let hashdag::graph::Parent::Derived { op, .. } = record.parent else {
        panic!("subdag output should be a derived artifact");
    };

    timeout(WAIT, session.execute(&[sorted[0]])).await??;

    // [2, 1] splits into two base-case sub-sorts plus one merge.
    let generated = session.store().smembers(&keys::op_subdag(&op))?;
    assert_eq!(generated.len(), 3, "expected 3 generated operations");

    fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn replayed_mergesort_runs_no_generator() -> TestResult {
    init_tracing();
    let session = test_session();

    let fleet = WorkerFleet::spawn(&session, 3);
    let input = session.put_json(&json!([6, 5, 4, 3, 2, 1]))?;
    let sorted = session.put_subdag(
        "mergesort",
        &[("list", input)],
        &[("sorted", Encoding::Json)],
        true,
    )?;
    timeout(WAIT, session.execute(&[sorted[0]])).await??;
    assert!(fleet.executed() > 0);
    fleet.shutdown().await;

    // Replay against the same store: the subdag is a cache hit, no
    // generator or merge runs again.
    let replay = session_on(session.store().clone());
    let replay_fleet = WorkerFleet::spawn(&replay, 3);
    let input = replay.put_json(&json!([6, 5, 4, 3, 2, 1]))?;
    let sorted = replay.put_subdag(
        "mergesort",
        &[("list", input)],
        &[("sorted", Encoding::Json)],
        true,
    )?;
    timeout(WAIT, replay.execute(&[sorted[0]])).await??;

    assert_eq!(replay_fleet.executed(), 0);
    match replay.fetch(&sorted[0])?.expect("sorted ready") {
        Value::Json(v) => assert_eq!(v, json!([1, 2, 3, 4, 5, 6])),
        other => panic!("expected JSON, got {other:?}"),
    }

    replay_fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn wrong_generator_arity_is_a_subdag_arity_error() -> TestResult {
    init_tracing();
    let session = test_session();

    // A generator that ignores its declared outputs.
    session.registry().register_generator("bad-arity", |scope, _inputs| {
        let mut out = std::collections::BTreeMap::new();
        out.insert("unexpected".to_string(), scope.put_json(&json!(1))?);
        Ok(out)
    });

    let fleet = WorkerFleet::spawn(&session, 1);

    let input = session.put_json(&json!([1]))?;
    let outputs = session.put_subdag(
        "bad-arity",
        &[("in", input)],
        &[("declared", Encoding::Json)],
        true,
    )?;

    timeout(WAIT, session.execute(&[outputs[0]])).await??;

    let record = session.fetch(&outputs[0])?.unwrap_err();
    assert_eq!(record.kind, ErrorKind::SubdagArity);

    fleet.shutdown().await;
    Ok(())
}
