// src/graphviz.rs

//! DOT emission for the provenance graph.

use std::collections::HashMap;

use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::errors::Result;
use crate::graph::{get_funsie, get_op, get_status, resolve_link, ArtifactStatus, FunsieKind};
use crate::hashing::Digest;
use crate::store::{keys, SharedStore, StoreExt};

/// Render every operation and artifact in the store as a DOT digraph.
///
/// Artifacts are boxes, operations are ellipses; edges carry slot names and
/// `linked` artifacts point at the artifact that owns their bytes.
pub fn provenance_dot(store: &SharedStore) -> Result<String> {
    let mut graph: DiGraph<String, String> = DiGraph::new();
    let mut art_nodes: HashMap<Digest, NodeIndex> = HashMap::new();
    let mut ops: Vec<Digest> = Vec::new();

    for key in store.keys_with_prefix(keys::IDX_PREFIX)? {
        let Some(hex) = key.strip_prefix(keys::IDX_PREFIX) else {
            continue;
        };
        let Ok(digest) = Digest::from_hex(hex) else {
            continue;
        };
        match store.get(&key)?.as_deref() {
            Some(b"a") => {
                let status = get_status(store.as_ref(), &digest)?;
                let label = format!("art {} [{}]", digest.short(), status_label(status));
                art_nodes.insert(digest, graph.add_node(label));
            }
            Some(b"o") => ops.push(digest),
            _ => {}
        }
    }

    for op_hash in ops {
        let op = get_op(store.as_ref(), &op_hash)?;
        let kind = get_funsie(store.as_ref(), &op.funsie)
            .map(|f| f.spec.kind())
            .unwrap_or(FunsieKind::DataSource);
        let node = graph.add_node(format!("{} {}", kind_label(kind), op_hash.short()));

        for (slot, art) in &op.inputs {
            if let Some(&from) = art_nodes.get(art) {
                graph.add_edge(from, node, slot.clone());
            }
        }
        for (slot, art) in &op.outputs {
            if let Some(&to) = art_nodes.get(art) {
                graph.add_edge(node, to, slot.clone());
            }
        }
    }

    // Dedup links: a linked artifact points at the owner of its bytes.
    let linked: Vec<(Digest, NodeIndex)> = art_nodes
        .iter()
        .map(|(digest, idx)| (*digest, *idx))
        .collect();
    for (digest, idx) in linked {
        if get_status(store.as_ref(), &digest)? == ArtifactStatus::Linked {
            let target = resolve_link(store.as_ref(), &digest)?;
            if let Some(&to) = art_nodes.get(&target) {
                graph.add_edge(idx, to, "link".to_string());
            }
        }
    }

    Ok(format!("{}", Dot::new(&graph)))
}

fn status_label(status: ArtifactStatus) -> &'static str {
    match status {
        ArtifactStatus::Unresolved => "unresolved",
        ArtifactStatus::Ready => "ready",
        ArtifactStatus::Error => "error",
        ArtifactStatus::Linked => "linked",
    }
}

fn kind_label(kind: FunsieKind) -> &'static str {
    match kind {
        FunsieKind::Shell => "shell",
        FunsieKind::Callable => "callable",
        FunsieKind::Subdag => "subdag",
        FunsieKind::DataSource => "data-source",
    }
}
