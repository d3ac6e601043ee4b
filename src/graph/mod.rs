// src/graph/mod.rs

//! The provenance graph: entity records, identities and their KV operations.

mod artifact;
mod error;
mod funsie;
mod op;
mod value;

pub use artifact::{
    const_digest, derived_digest, get_data, get_record, get_status, put_const, resolve_link,
    resolved_status, Artifact, ArtifactRecord, ArtifactStatus, Parent,
};
pub use error::{ErrorKind, ErrorRecord, ValueResult};
pub use funsie::{get_funsie, put_funsie, Funsie, FunsieKind, FunsieSpec, Slot};
pub use op::{
    get_op, get_options, get_status as get_op_status, operation_digest, put_operation, OpOptions,
    OpStatus, OperationRecord,
};
pub use value::{decode, encode, Encoding, Value};

pub(crate) use artifact::{
    mark_error_in, producer_in, read_data_in, resolve_link_in,
    status_in as artifact_status_in, write_output_in,
};
pub(crate) use op::{set_status_in as set_op_status_in, status_in as op_status_in};
