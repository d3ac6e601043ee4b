// tests/caching_replay.rs

use std::error::Error;

use serde_json::json;
use tokio::time::{timeout, Duration};

use hashdag::graph::{ArtifactStatus, Encoding};
use hashdag_test_utils::{init_tracing, session_on, test_session, WorkerFleet};

type TestResult = Result<(), Box<dyn Error>>;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn identical_workflows_share_identities() -> TestResult {
    init_tracing();
    let session = test_session();

    let a1 = session.put_const(Encoding::Blob, b"payload")?;
    let a2 = session.put_const(Encoding::Blob, b"payload")?;
    assert_eq!(a1.hash, a2.hash);

    let s1 = session.put_shell(&["cat in"], &[("in", a1)], &[])?;
    let s2 = session.put_shell(&["cat in"], &[("in", a2)], &[])?;
    assert_eq!(s1.op(), s2.op());
    assert_eq!(s1.stdout(0).hash, s2.stdout(0).hash);

    // The extra field deliberately breaks identity.
    let salted = session.put_shell_opts(
        &["cat in"],
        &[("in", a1)],
        &[],
        Some(b"salt".to_vec()),
        &Default::default(),
    )?;
    assert_ne!(salted.op(), s1.op());

    Ok(())
}

#[tokio::test]
async fn second_run_does_zero_work() -> TestResult {
    init_tracing();
    let session = test_session();

    // First run on one fleet.
    let fleet = WorkerFleet::spawn(&session, 2);
    let input = session.put_const(Encoding::Blob, b"hi")?;
    let shell = session.put_shell(&["cat in.txt"], &[("in.txt", input)], &[])?;
    timeout(WAIT, session.execute(&[shell.stdout(0)])).await??;
    assert_eq!(fleet.executed(), 1);
    fleet.shutdown().await;

    // Second run: same workflow, fresh session, fresh fleet, same store.
    let replay_session = session_on(session.store().clone());
    let replay_fleet = WorkerFleet::spawn(&replay_session, 2);

    let input = replay_session.put_const(Encoding::Blob, b"hi")?;
    let shell = replay_session.put_shell(&["cat in.txt"], &[("in.txt", input)], &[])?;
    timeout(WAIT, replay_session.execute(&[shell.stdout(0)])).await??;

    assert_eq!(
        replay_fleet.executed(),
        0,
        "replay must not execute anything"
    );
    assert_eq!(
        replay_session.fetch_bytes(&shell.stdout(0))?.unwrap(),
        b"hi"
    );

    replay_fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn replayed_callable_chain_is_fully_cached() -> TestResult {
    init_tracing();
    let session = test_session();

    let fleet = WorkerFleet::spawn(&session, 2);
    let values = session.put_json(&json!([1, 2, 3]))?;
    let summed = session.put_callable("sum", &[("values", values)], &[("sum", Encoding::Json)], true)?;
    timeout(WAIT, session.execute(&[summed[0]])).await??;
    let first_runs = fleet.executed();
    assert!(first_runs >= 1);
    fleet.shutdown().await;

    let replay = session_on(session.store().clone());
    let replay_fleet = WorkerFleet::spawn(&replay, 2);
    let values = replay.put_json(&json!([1, 2, 3]))?;
    let summed = replay.put_callable("sum", &[("values", values)], &[("sum", Encoding::Json)], true)?;
    timeout(WAIT, replay.execute(&[summed[0]])).await??;

    assert_eq!(replay_fleet.executed(), 0);
    replay_fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn identical_output_bytes_are_deduplicated() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 1);

    // Two different operations producing byte-identical files.
    let a = session.put_shell(&["printf same > a.txt"], &[], &["a.txt"])?;
    let b = session.put_shell(&["printf same > b.txt # variant"], &[], &["b.txt"])?;
    let a_out = a.file("a.txt").unwrap();
    let b_out = b.file("b.txt").unwrap();
    assert_ne!(a_out.hash, b_out.hash);

    timeout(WAIT, session.execute(&[a_out, b_out])).await??;

    let store = session.store();
    let status_a = hashdag::graph::get_status(store.as_ref(), &a_out.hash)?;
    let status_b = hashdag::graph::get_status(store.as_ref(), &b_out.hash)?;

    // One of them owns the bytes, the other is a link to it.
    assert!(
        matches!(
            (status_a, status_b),
            (ArtifactStatus::Ready, ArtifactStatus::Linked)
                | (ArtifactStatus::Linked, ArtifactStatus::Ready)
        ),
        "expected one ready + one linked, got {status_a:?} / {status_b:?}"
    );

    assert_eq!(session.fetch_bytes(&a_out)?.unwrap(), b"same");
    assert_eq!(session.fetch_bytes(&b_out)?.unwrap(), b"same");

    fleet.shutdown().await;
    Ok(())
}
