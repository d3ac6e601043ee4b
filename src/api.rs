// src/api.rs

//! User-facing workflow API.
//!
//! A [`Session`] scopes a store connection, a callable registry and default
//! operation options. Workflow constructors never execute anything: they
//! write graph records and hand back artifact handles ("pointers to future
//! data"). [`Session::execute`] is what makes the fleet produce them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::dag;
use crate::errors::{EngineError, Result};
use crate::exec::{stderr_slot, stdout_slot, CallableRegistry};
use crate::graph::{
    self, decode, put_operation, Artifact, Encoding, ErrorRecord, Funsie, FunsieKind, FunsieSpec,
    OpOptions, OperationRecord, Slot, ValueResult,
};
use crate::hashing::Digest;
use crate::store::{check_version, keys, SharedStore, StoreExt};

/// Minimum accepted hash-prefix length, in hex characters.
const MIN_PREFIX: usize = 4;

/// A scoped connection to the workflow store.
///
/// Opening a session checks the store's schema version; dropping it releases
/// the connection (RAII — there is no explicit teardown to forget).
pub struct Session {
    store: SharedStore,
    registry: Arc<CallableRegistry>,
    defaults: OpOptions,
    poll: Duration,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("defaults", &self.defaults)
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn open(store: SharedStore, registry: Arc<CallableRegistry>) -> Result<Self> {
        check_version(store.as_ref())?;
        Ok(Session {
            store,
            registry,
            defaults: OpOptions::default(),
            poll: Duration::from_millis(500),
        })
    }

    /// Default options applied to operations built through this session.
    pub fn with_defaults(mut self, defaults: OpOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Poll interval bounding `execute`'s wait on the wake channel.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CallableRegistry> {
        &self.registry
    }

    /// Store a user-provided artifact. Idempotent; identical content shares
    /// one identity.
    pub fn put_const(&self, encoding: Encoding, bytes: &[u8]) -> Result<Artifact> {
        graph::put_const(self.store.as_ref(), encoding, bytes)
    }

    /// Promote a bare value to a JSON const artifact.
    pub fn put_json<T: Serialize>(&self, value: &T) -> Result<Artifact> {
        let bytes = serde_json::to_vec(value)?;
        self.put_const(Encoding::Json, &bytes)
    }

    /// Register a shell operation: `commands` run in sequence in a scratch
    /// directory holding `inputs` (named by slot), and `outputs` names the
    /// files to capture. stdout/stderr of each command are captured as
    /// additional `stdout{i}` / `stderr{i}` outputs.
    pub fn put_shell(
        &self,
        commands: &[&str],
        inputs: &[(&str, Artifact)],
        outputs: &[&str],
    ) -> Result<ShellOutput> {
        build_shell(&self.store, commands, inputs, outputs, None, &self.defaults)
    }

    /// `put_shell` with explicit extra bytes (identity salt) and options.
    pub fn put_shell_opts(
        &self,
        commands: &[&str],
        inputs: &[(&str, Artifact)],
        outputs: &[&str],
        extra: Option<Vec<u8>>,
        options: &OpOptions,
    ) -> Result<ShellOutput> {
        build_shell(&self.store, commands, inputs, outputs, extra, options)
    }

    /// Register an in-process callable operation. Returns the output
    /// artifacts in declared order.
    pub fn put_callable(
        &self,
        name: &str,
        inputs: &[(&str, Artifact)],
        outputs: &[(&str, Encoding)],
        strict: bool,
    ) -> Result<Vec<Artifact>> {
        self.put_callable_opts(name, inputs, outputs, strict, None, &self.defaults)
    }

    pub fn put_callable_opts(
        &self,
        name: &str,
        inputs: &[(&str, Artifact)],
        outputs: &[(&str, Encoding)],
        strict: bool,
        extra: Option<Vec<u8>>,
        options: &OpOptions,
    ) -> Result<Vec<Artifact>> {
        let (_, arts) = build_callable(
            &self.store,
            FunsieKind::Callable,
            name,
            inputs,
            outputs,
            strict,
            extra,
            options,
        )?;
        Ok(arts)
    }

    /// Register a dynamic sub-DAG operation driven by a registered
    /// generator. Returns the declared output artifacts in order.
    pub fn put_subdag(
        &self,
        generator: &str,
        inputs: &[(&str, Artifact)],
        outputs: &[(&str, Encoding)],
        strict: bool,
    ) -> Result<Vec<Artifact>> {
        let (_, arts) = build_callable(
            &self.store,
            FunsieKind::Subdag,
            generator,
            inputs,
            outputs,
            strict,
            None,
            &self.defaults,
        )?;
        Ok(arts)
    }

    /// Submit and block until every target artifact is terminal (`Ready` or
    /// `Error`; errors do not abort sibling branches).
    pub async fn execute(&self, targets: &[Artifact]) -> Result<()> {
        let hashes: Vec<Digest> = targets.iter().map(|a| a.hash).collect();
        self.execute_hashes(&hashes).await
    }

    pub async fn execute_hashes(&self, targets: &[Digest]) -> Result<()> {
        dag::execute(&self.store, targets, self.poll).await
    }

    /// Retrieve the value behind an artifact, decoded per its declared
    /// encoding. Data-level failure comes back as the `Err` arm of the
    /// inner result, never as an engine error.
    pub fn fetch(&self, artifact: &Artifact) -> Result<ValueResult> {
        let raw = graph::get_data(self.store.as_ref(), &artifact.hash)?;
        Ok(match raw {
            Ok(bytes) => decode(artifact.encoding, &bytes, None),
            Err(record) => Err(record),
        })
    }

    /// Raw bytes variant of [`Session::fetch`].
    pub fn fetch_bytes(
        &self,
        artifact: &Artifact,
    ) -> Result<std::result::Result<Vec<u8>, ErrorRecord>> {
        graph::get_data(self.store.as_ref(), &artifact.hash)
    }

    /// Rebuild an artifact handle from its stored record.
    pub fn artifact(&self, hash: &Digest) -> Result<Artifact> {
        let record = graph::get_record(self.store.as_ref(), hash)?;
        Ok(Artifact {
            hash: record.hash,
            encoding: record.encoding,
        })
    }

    /// Resolve an unambiguous hex prefix (at least four characters) to a
    /// full digest via the short-hash index.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<Digest> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.len() < MIN_PREFIX || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EngineError::PrefixTooShort(prefix));
        }

        let scan = format!("{}{}", keys::IDX_PREFIX, prefix);
        let matches: Vec<String> = self
            .store
            .keys_with_prefix(&scan)?
            .into_iter()
            .filter_map(|k| k.strip_prefix(keys::IDX_PREFIX).map(str::to_string))
            .collect();

        match matches.len() {
            0 => Err(EngineError::UnknownObject(format!("prefix {prefix}"))),
            1 => Digest::from_hex(&matches[0]),
            _ => Err(EngineError::AmbiguousPrefix {
                prefix,
                candidates: matches.into_iter().map(|h| h[..12].to_string()).collect(),
            }),
        }
    }

    /// Expand a digest into target artifacts: an artifact is itself, an
    /// operation stands for all of its outputs.
    pub fn expand_target(&self, hash: &Digest) -> Result<Vec<Digest>> {
        match self.store.get(&keys::idx(hash))?.as_deref() {
            Some(b"a") => Ok(vec![*hash]),
            Some(b"o") => {
                let op = graph::get_op(self.store.as_ref(), hash)?;
                Ok(op.outputs.values().copied().collect())
            }
            Some(b"f") => Err(EngineError::UnknownObject(format!(
                "{hash} is a funsie, not an executable target"
            ))),
            _ => Err(EngineError::UnknownObject(hash.to_hex())),
        }
    }
}

/// Handle bundle returned by the shell constructors: the declared file
/// outputs plus the automatically captured `stdout{i}` / `stderr{i}` slots.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    op: Digest,
    files: BTreeMap<String, Artifact>,
    stdouts: Vec<Artifact>,
    stderrs: Vec<Artifact>,
}

impl ShellOutput {
    pub fn op(&self) -> Digest {
        self.op
    }

    /// Captured stdout of command `i`.
    pub fn stdout(&self, i: usize) -> Artifact {
        self.stdouts[i]
    }

    /// Captured stderr of command `i`.
    pub fn stderr(&self, i: usize) -> Artifact {
        self.stderrs[i]
    }

    /// A declared output file by name.
    pub fn file(&self, name: &str) -> Option<Artifact> {
        self.files.get(name).copied()
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, Artifact)> {
        self.files.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Shared shell-operation constructor (sessions and sub-DAG scopes).
pub(crate) fn build_shell(
    store: &SharedStore,
    commands: &[&str],
    inputs: &[(&str, Artifact)],
    outputs: &[&str],
    extra: Option<Vec<u8>>,
    options: &OpOptions,
) -> Result<ShellOutput> {
    if commands.is_empty() {
        return Err(EngineError::ConfigError(
            "a shell operation needs at least one command".to_string(),
        ));
    }
    for name in outputs {
        if is_auto_slot(name, commands.len()) {
            return Err(EngineError::ConfigError(format!(
                "output name '{name}' collides with a captured stdout/stderr slot"
            )));
        }
    }

    let input_slots: Vec<Slot> = inputs
        .iter()
        .map(|(name, art)| Slot::new(*name, art.encoding))
        .collect();

    let mut output_slots: Vec<Slot> = outputs
        .iter()
        .map(|name| Slot::new(*name, Encoding::Blob))
        .collect();
    for i in 0..commands.len() {
        output_slots.push(Slot::new(stdout_slot(i), Encoding::Blob));
        output_slots.push(Slot::new(stderr_slot(i), Encoding::Blob));
    }

    let funsie = Funsie {
        spec: FunsieSpec::Shell {
            commands: commands.iter().map(|c| c.to_string()).collect(),
        },
        inputs: input_slots,
        outputs: output_slots,
        strict: true,
        extra,
    };

    let bindings = input_map(inputs)?;
    let record = put_operation(store.as_ref(), &funsie, &bindings, options)?;
    debug!(op = %record.hash.short(), commands = commands.len(), "registered shell operation");

    let art = |name: &str| -> Artifact {
        Artifact {
            hash: record.outputs[name],
            encoding: Encoding::Blob,
        }
    };
    Ok(ShellOutput {
        op: record.hash,
        files: outputs.iter().map(|n| (n.to_string(), art(n))).collect(),
        stdouts: (0..commands.len()).map(|i| art(&stdout_slot(i))).collect(),
        stderrs: (0..commands.len()).map(|i| art(&stderr_slot(i))).collect(),
    })
}

/// Shared constructor for callable and subdag operations.
pub(crate) fn build_callable(
    store: &SharedStore,
    kind: FunsieKind,
    name: &str,
    inputs: &[(&str, Artifact)],
    outputs: &[(&str, Encoding)],
    strict: bool,
    extra: Option<Vec<u8>>,
    options: &OpOptions,
) -> Result<(OperationRecord, Vec<Artifact>)> {
    let spec = match kind {
        FunsieKind::Callable => FunsieSpec::Callable {
            name: name.to_string(),
        },
        FunsieKind::Subdag => FunsieSpec::Subdag {
            generator: name.to_string(),
        },
        other => {
            return Err(EngineError::ConfigError(format!(
                "cannot build a {other:?} operation from a callable constructor"
            )))
        }
    };

    let funsie = Funsie {
        spec,
        inputs: inputs
            .iter()
            .map(|(n, art)| Slot::new(*n, art.encoding))
            .collect(),
        outputs: outputs
            .iter()
            .map(|(n, enc)| Slot::new(*n, *enc))
            .collect(),
        strict,
        extra,
    };

    let bindings = input_map(inputs)?;
    let record = put_operation(store.as_ref(), &funsie, &bindings, options)?;
    debug!(op = %record.hash.short(), name, ?kind, "registered operation");

    let arts = outputs
        .iter()
        .map(|(n, enc)| Artifact {
            hash: record.outputs[*n],
            encoding: *enc,
        })
        .collect();
    Ok((record, arts))
}

fn input_map(inputs: &[(&str, Artifact)]) -> Result<BTreeMap<String, Artifact>> {
    let mut map = BTreeMap::new();
    for (name, art) in inputs {
        if map.insert(name.to_string(), *art).is_some() {
            return Err(EngineError::SlotMismatch(format!(
                "duplicate input slot '{name}'"
            )));
        }
    }
    Ok(map)
}

fn is_auto_slot(name: &str, n_commands: usize) -> bool {
    (0..n_commands).any(|i| name == stdout_slot(i) || name == stderr_slot(i))
}
