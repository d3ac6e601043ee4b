// tests/error_propagation.rs

use std::error::Error;

use serde_json::json;
use tokio::time::{timeout, Duration};

use hashdag::graph::{Encoding, ErrorKind, Value};
use hashdag_test_utils::{init_tracing, test_session, WorkerFleet};

type TestResult = Result<(), Box<dyn Error>>;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn upstream_error_short_circuits_strict_consumer() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 2);

    // A shell op that fails before producing its declared output.
    let failing = session.put_shell(&["exit 1"], &[], &["x"])?;
    let x = failing.file("x").unwrap();

    // A strict callable downstream of the failure.
    let downstream = session.put_callable("uppercase", &[("text", x)], &[("upper", Encoding::Blob)], true)?;

    // An unrelated sibling branch.
    let sibling = session.put_shell(&["echo ok"], &[], &[])?;

    timeout(
        WAIT,
        session.execute(&[downstream[0], sibling.stdout(0)]),
    )
    .await??;

    // The consumer short-circuited with the origin preserved.
    let record = session.fetch_bytes(&downstream[0])?.unwrap_err();
    assert_eq!(record.kind, ErrorKind::Upstream);
    assert_eq!(record.origin, Some(failing.op()));

    // The sibling branch was not torn down.
    assert_eq!(session.fetch_bytes(&sibling.stdout(0))?.unwrap(), b"ok\n");

    fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn non_strict_consumer_recovers_from_upstream_error() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 2);

    let failing = session.put_shell(&["exit 1"], &[], &["x"])?;
    let x = failing.file("x").unwrap();

    // Same consumer shape, declared non-strict: it sees the error as a
    // Result value and substitutes its own answer.
    let recovered = session.put_callable("recover", &[("value", x)], &[("out", Encoding::Json)], false)?;

    timeout(WAIT, session.execute(&[recovered[0]])).await??;

    match session.fetch(&recovered[0])?.expect("recovered output ready") {
        Value::Json(v) => assert_eq!(v, json!("handled")),
        other => panic!("expected JSON, got {other:?}"),
    }

    fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn error_chains_preserve_the_original_origin() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 2);

    let failing = session.put_shell(&["exit 1"], &[], &["x"])?;
    let x = failing.file("x").unwrap();

    let first = session.put_callable("uppercase", &[("text", x)], &[("upper", Encoding::Blob)], true)?;
    let second =
        session.put_callable("uppercase", &[("text", first[0])], &[("upper", Encoding::Blob)], true)?;

    timeout(WAIT, session.execute(&[second[0]])).await??;

    // Two hops of strict propagation later, the origin is still the shell
    // operation that actually failed.
    let record = session.fetch_bytes(&second[0])?.unwrap_err();
    assert_eq!(record.kind, ErrorKind::Upstream);
    assert_eq!(record.origin, Some(failing.op()));

    fleet.shutdown().await;
    Ok(())
}
