// tests/graph_dot.rs

use std::error::Error;

use tokio::time::{timeout, Duration};

use hashdag::graph::Encoding;
use hashdag::graphviz::provenance_dot;
use hashdag_test_utils::{init_tracing, test_session, WorkerFleet};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn dot_output_names_operations_and_artifacts() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 1);

    let input = session.put_const(Encoding::Blob, b"hi")?;
    let shell = session.put_shell(&["cat in.txt"], &[("in.txt", input)], &[])?;
    timeout(Duration::from_secs(10), session.execute(&[shell.stdout(0)])).await??;

    let dot = provenance_dot(session.store())?;

    assert!(dot.starts_with("digraph"));
    assert!(dot.contains(&format!("shell {}", shell.op().short())));
    assert!(dot.contains(&format!("art {}", input.hash.short())));
    assert!(dot.contains("in.txt"), "input edge should carry the slot name");
    assert!(dot.contains("stdout0"), "output edge should carry the slot name");

    fleet.shutdown().await;
    Ok(())
}
