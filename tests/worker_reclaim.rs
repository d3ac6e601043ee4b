// tests/worker_reclaim.rs

use std::error::Error;

use tokio::time::{timeout, Duration};

use hashdag::dag::schedule_pass;
use hashdag::graph::{get_op_status, Encoding, OpOptions, OpStatus};
use hashdag::queue::JobQueue;
use hashdag::store::keys;
use hashdag_test_utils::{init_tracing, test_session, WorkerFleet};

type TestResult = Result<(), Box<dyn Error>>;

const WAIT: Duration = Duration::from_secs(10);

/// A worker that crashes mid-operation leaves a `Running` claim with a
/// heartbeat that goes stale. Simulate the crash by claiming directly and
/// never finishing, then let a real worker reclaim and complete the
/// operation.
#[tokio::test]
async fn stale_claims_are_reclaimed_and_completed() -> TestResult {
    init_tracing();
    let session = test_session();

    let input = session.put_const(Encoding::Blob, b"payload")?;
    let shell = session.put_shell(&["cat in.txt"], &[("in.txt", input)], &[])?;
    let target = shell.stdout(0);

    // Make the operation claimable, then "crash": claim it and stop.
    schedule_pass(session.store(), &[target.hash])?;
    let queue = JobQueue::new(session.store().clone(), "default");
    let claimed = queue.claim()?.expect("one operation to claim");
    assert_eq!(claimed, shell.op());
    assert_eq!(
        get_op_status(session.store().as_ref(), &claimed)?,
        Some(OpStatus::Running)
    );

    // Age the heartbeat far past any threshold.
    session.store().atomically(&mut |t| {
        t.set(&keys::op_heartbeat(&claimed), b"0".to_vec());
        Ok(())
    })?;

    // A live worker's idle reclaim scan picks the operation back up.
    let fleet = WorkerFleet::spawn(&session, 1);
    timeout(WAIT, session.execute(&[target])).await??;

    assert_eq!(session.fetch_bytes(&target)?.unwrap(), b"payload");
    assert_eq!(
        get_op_status(session.store().as_ref(), &claimed)?,
        Some(OpStatus::Done)
    );
    // Exactly one execution: the reclaimed attempt.
    assert_eq!(fleet.executed(), 1);

    fleet.shutdown().await;
    Ok(())
}

/// The reclaim scan is global, but a reclaimed operation must land back on
/// its own queue — a worker bound to queue "a" healing a stale claim from
/// queue "b" must not pull that operation in front of its own pool.
#[tokio::test]
async fn reclaimed_operations_return_to_their_own_queue() -> TestResult {
    init_tracing();
    let session = test_session();

    let options = OpOptions {
        queue: "b".to_string(),
        timeout_secs: None,
    };
    let shell = session.put_shell_opts(&["echo routed"], &[], &[], None, &options)?;
    let target = shell.stdout(0);

    // The readiness pass routes the operation to queue "b"; claim it from
    // there and "crash".
    schedule_pass(session.store(), &[target.hash])?;
    let queue_b = JobQueue::new(session.store().clone(), "b");
    let claimed = queue_b.claim()?.expect("one operation on queue b");
    assert_eq!(claimed, shell.op());

    session.store().atomically(&mut |t| {
        t.set(&keys::op_heartbeat(&claimed), b"0".to_vec());
        Ok(())
    })?;

    // A worker bound to queue "a" runs the scan.
    let queue_a = JobQueue::new(session.store().clone(), "a");
    let reclaimed = queue_a.reclaim_stale(Duration::from_secs(60))?;
    assert_eq!(reclaimed, vec![claimed]);

    // The operation is pending again on "b", and "a" stays empty.
    assert_eq!(queue_a.claim()?, None);
    assert_eq!(
        get_op_status(session.store().as_ref(), &claimed)?,
        Some(OpStatus::Pending)
    );
    assert_eq!(queue_b.claim()?, Some(claimed));

    Ok(())
}

/// Claims whose heartbeat is fresh are left alone by the reclaim scan.
#[tokio::test]
async fn fresh_claims_are_not_reclaimed() -> TestResult {
    init_tracing();
    let session = test_session();

    let shell = session.put_shell(&["echo x"], &[], &[])?;
    schedule_pass(session.store(), &[shell.stdout(0).hash])?;

    let queue = JobQueue::new(session.store().clone(), "default");
    let claimed = queue.claim()?.expect("one operation to claim");

    let reclaimed = queue.reclaim_stale(Duration::from_secs(60))?;
    assert!(reclaimed.is_empty());
    assert_eq!(
        get_op_status(session.store().as_ref(), &claimed)?,
        Some(OpStatus::Running)
    );

    Ok(())
}
