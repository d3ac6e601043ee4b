// tests/shell_roundtrip.rs

use std::error::Error;

use tokio::time::{timeout, Duration};

use hashdag::graph::{Encoding, ErrorKind};
use hashdag_test_utils::{init_tracing, test_session, WorkerFleet};

type TestResult = Result<(), Box<dyn Error>>;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn cat_roundtrips_const_input() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 2);

    let input = session.put_const(Encoding::Blob, b"hi")?;
    let shell = session.put_shell(&["cat in.txt"], &[("in.txt", input)], &[])?;

    timeout(WAIT, session.execute(&[shell.stdout(0)])).await??;

    let bytes = session.fetch_bytes(&shell.stdout(0))?.expect("stdout ready");
    assert_eq!(bytes, b"hi");

    fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn declared_output_files_are_captured() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 1);

    let input = session.put_const(Encoding::Blob, b"alpha\nbeta\n")?;
    let shell = session.put_shell(
        &["sort in.txt > sorted.txt", "wc -l < sorted.txt > count.txt"],
        &[("in.txt", input)],
        &["sorted.txt", "count.txt"],
    )?;
    let sorted = shell.file("sorted.txt").unwrap();
    let count = shell.file("count.txt").unwrap();

    timeout(WAIT, session.execute(&[sorted, count])).await??;

    assert_eq!(session.fetch_bytes(&sorted)?.unwrap(), b"alpha\nbeta\n");
    let count_text = String::from_utf8(session.fetch_bytes(&count)?.unwrap())?;
    assert_eq!(count_text.trim(), "2");

    fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn missing_output_file_errors_that_slot_only() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 1);

    let shell = session.put_shell(&["echo made > there.txt"], &[], &["there.txt", "absent.txt"])?;
    let there = shell.file("there.txt").unwrap();
    let absent = shell.file("absent.txt").unwrap();

    timeout(WAIT, session.execute(&[there, absent])).await??;

    assert_eq!(session.fetch_bytes(&there)?.unwrap(), b"made\n");
    let record = session.fetch_bytes(&absent)?.unwrap_err();
    assert_eq!(record.kind, ErrorKind::MissingOutput);
    assert_eq!(record.origin, Some(shell.op()));

    fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn nonzero_exit_fails_declared_outputs() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 1);

    let shell = session.put_shell(
        &["echo first", "exit 3", "echo never"],
        &[],
        &["out.txt"],
    )?;
    let out = shell.file("out.txt").unwrap();

    timeout(WAIT, session.execute(&[out])).await??;

    // Commands before the failure still have their captures.
    assert_eq!(session.fetch_bytes(&shell.stdout(0))?.unwrap(), b"first\n");

    // The failing command's own captures are kept too.
    assert!(session.fetch_bytes(&shell.stdout(1))?.is_ok());

    // The declared file and the skipped command's captures are errors.
    let record = session.fetch_bytes(&out)?.unwrap_err();
    assert_eq!(record.kind, ErrorKind::NonzeroExit);
    assert!(record.message.contains("code 3"));

    let skipped = session.fetch_bytes(&shell.stdout(2))?.unwrap_err();
    assert_eq!(skipped.kind, ErrorKind::NonzeroExit);
    assert!(skipped.message.contains("did not run"));

    fleet.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn scratch_directories_are_isolated() -> TestResult {
    init_tracing();
    let session = test_session();
    let fleet = WorkerFleet::spawn(&session, 1);

    // Only materialized inputs are visible in the working directory.
    let input = session.put_const(Encoding::Blob, b"x")?;
    let shell = session.put_shell(&["ls"], &[("only-file", input)], &[])?;

    timeout(WAIT, session.execute(&[shell.stdout(0)])).await??;

    let listing = String::from_utf8(session.fetch_bytes(&shell.stdout(0))?.unwrap())?;
    assert_eq!(listing.trim(), "only-file");

    fleet.shutdown().await;
    Ok(())
}
