// tests/callables.rs

use std::error::Error;

use serde_json::json;
use tokio::time::{timeout, Duration};

use hashdag::graph::{Encoding, ErrorKind, OpOptions, Value};
use hashdag_test_utils::{init_tracing, test_session, WorkerFleet};

type TestResult = Result<(), Box<dyn Error>>;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn sum_callable_produces_structured_value() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 2);

    let values = session.put_json(&json!([1, 2, 3]))?;
    let outputs = session.put_callable(
        "sum",
        &[("values", values)],
        &[("sum", Encoding::Json)],
        true,
    )?;
    let total = outputs[0];

    timeout(WAIT, session.execute(&[total])).await??;

    match session.fetch(&total)?.expect("sum ready") {
        Value::Json(v) => assert_eq!(v, json!(6)),
        other => panic!("expected JSON, got {other:?}"),
    }

    fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unregistered_callable_errors_cleanly() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 1);

    let input = session.put_json(&json!(1))?;
    let outputs = session.put_callable(
        "no-such-callable",
        &[("value", input)],
        &[("out", Encoding::Json)],
        true,
    )?;

    timeout(WAIT, session.execute(&[outputs[0]])).await??;

    let record = session.fetch(&outputs[0])?.unwrap_err();
    assert_eq!(record.kind, ErrorKind::CallableRaised);
    assert!(record.message.contains("no-such-callable"));

    fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn strict_callable_rejects_undecodable_input() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 1);

    // Declared JSON, but the bytes are not valid JSON.
    let bad = session.put_const(Encoding::Json, b"not json at all")?;
    let outputs = session.put_callable("sum", &[("values", bad)], &[("sum", Encoding::Json)], true)?;

    timeout(WAIT, session.execute(&[outputs[0]])).await??;

    let record = session.fetch(&outputs[0])?.unwrap_err();
    assert_eq!(record.kind, ErrorKind::DecodeError);

    fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn operation_timeout_becomes_an_error_value() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 1);

    let options = OpOptions {
        timeout_secs: Some(1),
        ..OpOptions::default()
    };
    let shell = session.put_shell_opts(&["sleep 30"], &[], &[], None, &options)?;

    timeout(WAIT, session.execute(&[shell.stdout(0)])).await??;

    let record = session.fetch_bytes(&shell.stdout(0))?.unwrap_err();
    assert_eq!(record.kind, ErrorKind::Timeout);
    assert_eq!(record.origin, Some(shell.op()));

    fleet.shutdown().await;
    Ok(())
}
