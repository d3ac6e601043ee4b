// tests/store_semantics.rs

//! Store-level invariants: write-once enforcement, schema versioning,
//! prefix lookup, and the file backend.

use std::error::Error;
use std::sync::Arc;

use hashdag::api::Session;
use hashdag::errors::EngineError;
use hashdag::exec::CallableRegistry;
use hashdag::graph::{const_digest, put_const, Encoding};
use hashdag::store::{check_version, keys, FileStore, Store, StoreExt};
use hashdag_test_utils::{init_tracing, memory_store, test_session};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn rewriting_a_data_key_with_different_bytes_is_a_collision() -> TestResult {
    init_tracing();
    let store = memory_store();

    // Pre-seed the artifact data key with bytes that do not match the hash.
    let hash = const_digest(Encoding::Blob, b"real content");
    store.set(&keys::art_data(&hash), b"something else")?;

    let result = put_const(store.as_ref(), Encoding::Blob, b"real content");
    match result {
        Err(EngineError::HashCollision(key)) => assert!(key.contains(&hash.to_hex())),
        other => panic!("expected HashCollision, got {other:?}"),
    }

    // The failed transaction must not have marked anything ready.
    assert_eq!(store.get(&keys::art_status(&hash))?, None);
    Ok(())
}

#[test]
fn schema_version_mismatch_is_refused() -> TestResult {
    init_tracing();
    let store = memory_store();
    store.set(keys::VERSION_KEY, b"0")?;

    match check_version(store.as_ref()) {
        Err(EngineError::VersionMismatch { found, .. }) => assert_eq!(found, "0"),
        other => panic!("expected VersionMismatch, got {other:?}"),
    }

    match Session::open(store, Arc::new(CallableRegistry::new())) {
        Err(EngineError::VersionMismatch { .. }) => {}
        other => panic!("expected VersionMismatch from Session::open, got {other:?}"),
    }
    Ok(())
}

#[test]
fn prefix_lookup_requires_four_unambiguous_characters() -> TestResult {
    init_tracing();
    let session = test_session();

    let artifact = session.put_const(Encoding::Blob, b"prefix me")?;
    let hex = artifact.hash.to_hex();

    assert_eq!(session.resolve_prefix(&hex[..6])?, artifact.hash);
    assert_eq!(session.resolve_prefix(&hex)?, artifact.hash);

    match session.resolve_prefix(&hex[..3]) {
        Err(EngineError::PrefixTooShort(_)) => {}
        other => panic!("expected PrefixTooShort, got {other:?}"),
    }

    match session.resolve_prefix("ffffffff") {
        Err(EngineError::UnknownObject(_)) => {}
        other => panic!("expected UnknownObject, got {other:?}"),
    }
    Ok(())
}

#[test]
fn ambiguous_prefixes_are_rejected_with_candidates() -> TestResult {
    init_tracing();
    let session = test_session();

    // Store artifacts until two share a 4-character hex prefix. With
    // 16^4 = 65536 buckets this reliably happens within a few hundred.
    let mut by_prefix: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let mut ambiguous: Option<String> = None;
    for i in 0u32..2048 {
        let artifact = session.put_const(Encoding::Blob, &i.to_be_bytes())?;
        let hex = artifact.hash.to_hex();
        let prefix = hex[..4].to_string();
        if let Some(existing) = by_prefix.insert(prefix.clone(), hex.clone()) {
            if existing != hex {
                ambiguous = Some(prefix);
                break;
            }
        }
    }

    let prefix = ambiguous.expect("a shared 4-char prefix within 2048 artifacts");
    match session.resolve_prefix(&prefix) {
        Err(EngineError::AmbiguousPrefix { candidates, .. }) => {
            assert!(candidates.len() >= 2);
        }
        other => panic!("expected AmbiguousPrefix, got {other:?}"),
    }
    Ok(())
}

#[test]
fn list_primitives_track_queue_depth() -> TestResult {
    init_tracing();
    let store = memory_store();

    store.atomically(&mut |t| {
        assert_eq!(t.llen("q"), 0);
        t.rpush("q", "a".to_string());
        t.rpush("q", "b".to_string());
        assert_eq!(t.llen("q"), 2);
        assert_eq!(t.lpop("q"), Some("a".to_string()));
        assert_eq!(t.llen("q"), 1);
        Ok(())
    })?;
    Ok(())
}

#[test]
fn file_store_persists_across_instances() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("store.json");

    let hash = {
        let store: hashdag::store::SharedStore = Arc::new(FileStore::open(&path)?);
        check_version(store.as_ref())?;
        put_const(store.as_ref(), Encoding::Blob, b"durable")?.hash
    };

    // A second instance over the same file sees the artifact.
    let store: hashdag::store::SharedStore = Arc::new(FileStore::open(&path)?);
    check_version(store.as_ref())?;
    assert_eq!(
        hashdag::graph::get_data(store.as_ref(), &hash)?.unwrap(),
        b"durable"
    );

    // The lock file is not left behind.
    assert!(!path.with_extension("lock").exists());
    Ok(())
}

#[test]
fn file_store_rolls_back_failed_transactions() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = FileStore::open(dir.path().join("store.json"))?;

    let result = store.atomically(&mut |t| {
        t.set("doomed", b"value".to_vec());
        Err(EngineError::StoreFailure("forced".to_string()))
    });
    assert!(result.is_err());
    assert_eq!(store.get("doomed")?, None);
    Ok(())
}
