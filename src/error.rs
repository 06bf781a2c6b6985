//! Error and status types.
//!
//! The decode hot path never allocates an error: [`DecodeStatus`] is a small
//! `Copy` enum that gets threaded back out through the chained fast-path and
//! mini-table dispatch functions (see `crate::decode` and
//! `crate::fastdecode`). Schema-builder errors are richer (they carry the
//! offending name) since they are cold-path and already allocate a def graph.

extern crate alloc;

use alloc::string::String;

/// Outcome of a single [`crate::decode::decode`] call.
///
/// Mirrors the status enum named in the specification: `ok`, `malformed`,
/// `out-of-memory`, `bad-utf8`, `max-depth-exceeded`, `missing-required`,
/// `unlinked-sub-message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeStatus {
    #[error("ok")]
    Ok,
    #[error("malformed wire-format input")]
    Malformed,
    #[error("arena allocation failed")]
    OutOfMemory,
    #[error("invalid UTF-8 in a string field")]
    BadUtf8,
    #[error("maximum sub-message recursion depth exceeded")]
    MaxDepthExceeded,
    #[error("one or more required fields are missing")]
    MissingRequired,
    #[error("sub-message field is not linked to a mini-table and unlinked parsing is disabled")]
    UnlinkedSubMessage,
}

impl DecodeStatus {
    pub const fn is_ok(self) -> bool {
        matches!(self, DecodeStatus::Ok)
    }
}

/// Failure of an arena allocation. Kept unit-like (no payload) so it stays
/// `Copy` and can be converted to [`DecodeStatus::OutOfMemory`] for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("arena allocation failed")]
    AllocationFailed,
}

impl From<ArenaError> for DecodeStatus {
    fn from(_: ArenaError) -> Self {
        DecodeStatus::OutOfMemory
    }
}

/// Errors from the def builder / symbol table (`crate::schema`).
///
/// Unlike [`DecodeStatus`] these carry the offending fully-qualified name:
/// they are cold-path (schema construction happens once, not per-message)
/// and the caller needs the name to act on the error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DefError {
    #[error("duplicate definition name: {0}")]
    DuplicateName(String),
    #[error("anonymous def cannot be added to a symbol table")]
    AnonymousDef,
    #[error("unresolved symbolic reference {reference:?} from {from:?}")]
    UnresolvedReference { from: String, reference: String },
    #[error("field number {0} is out of range (must be in 1..=2^29-1)")]
    FieldNumberOutOfRange(u32),
    #[error("message {message:?} has more than {max} fields")]
    TooManyFields { message: String, max: u32 },
    #[error("field {field:?} already has a value set for field number {number} in message {message:?}")]
    DuplicateFieldNumber {
        message: String,
        field: String,
        number: u32,
    },
    #[error("a cycle through required fields prevents freezing without exceeding recursion limits")]
    CyclicRequiredFields,
    #[error("def {0} belongs to a different, already-frozen def pool")]
    ForeignDef(String),
}
