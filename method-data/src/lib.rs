//! Out-of-process decoder for HotSpot compiler-interface method profiles (`ciMethodData`).
//!
//! A [`ProfileWalker`] snapshots one profile out of target memory using a [`ProfileLayout`]
//! resolved from a [`TypeSchema`], then enumerates its records as [`ProfileRecord`]s. The
//! [`replay`] module turns a walker into the `ciMethodData` line of a compiler replay file and
//! [`print`] produces a human readable dump.

pub mod address;
pub mod layout;
pub mod memory;
pub mod print;
pub mod record;
pub mod replay;
pub mod resolver;
pub mod schema;
pub mod walker;

/// Builders for synthetic profiles and memory images, for this crate's tests and, with the
/// `test-utils` feature, for downstream tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use address::Address;
pub use layout::DataLayout;
pub use memory::{MappedMemory, MemoryError, MemoryReader, SliceMemory};
pub use record::{ProfileRecord, Tag};
pub use replay::{serialize, write_replay, ReplayError};
pub use resolver::{Klass, Method, ObjectResolver, SymbolTable, VmResolver};
pub use schema::{Endian, ProfileLayout, SchemaError, TypeSchema};
pub use walker::{ProfileWalker, Snapshot, State};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Schema Error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Memory Error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Record Error: {0}")]
    Record(#[from] record::Error),

    #[error("invalid value {value} for {field}")]
    InvalidField { field: &'static str, value: i64 },

    #[error("IO Error:")]
    Io(#[from] std::io::Error),
}
