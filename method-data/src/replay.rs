//! The `ciMethodData` line of a compiler replay file.
//!
//! ```text
//! ciMethodData <holder> <name> <signature> <state> <mileage> orig <n> <byte>... data <m> 0x<word>...
//!     oops <k> (<cell index> <klass name>)... methods <j> (<cell index> <holder> <name> <sig>)...
//! ```
//!
//! The cross-reference lists are preceded by their length, so each list is enumerated twice:
//! once to count and once to emit.

use crate::address::Address;
use crate::record::{self, ProfileRecord};
use crate::resolver::{Klass, Method, ObjectResolver};
use crate::walker::ProfileWalker;
use std::io::{self, Write};

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("{category}: counted {counted} references but emitted {emitted}")]
    CountMismatch {
        category: &'static str,
        counted: usize,
        emitted: usize,
    },

    #[error("unable to resolve the profiled method at {0}")]
    UnresolvedMethod(Address),

    #[error("Record Error: {0}")]
    Record(#[from] record::Error),

    #[error("IO Error:")]
    Io(#[from] io::Error),
}

/// Renders `walker` as a replay line, including the trailing newline.
pub fn serialize(
    walker: &ProfileWalker<'_>,
    resolver: &dyn ObjectResolver,
) -> Result<String, ReplayError> {
    let mut out = Vec::new();
    write_replay(walker, resolver, &mut out)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Streams the replay line for `walker` into `out`.
///
/// On error, whatever was already written is incomplete and must be discarded.
pub fn write_replay<W: Write>(
    walker: &ProfileWalker<'_>,
    resolver: &dyn ObjectResolver,
    mut out: W,
) -> Result<(), ReplayError> {
    let method = walker
        .method(resolver)
        .ok_or(ReplayError::UnresolvedMethod(walker.method_address()))?;
    write!(
        out,
        "ciMethodData {} {} {}",
        method.replay_name(),
        walker.state().raw(),
        walker.current_mileage()
    )?;

    let orig = walker.orig_bytes();
    write!(out, " orig {}", orig.len())?;
    for byte in orig {
        write!(out, " {byte}")?;
    }

    let words = walker.raw_words();
    write!(out, " data {}", words.len())?;
    for word in words {
        write!(out, " 0x{word:x}")?;
    }

    two_rounds("oops", &mut out, |emit| {
        for_each_oop(walker, resolver, |cell, klass| emit(cell, klass.name()))
    })?;
    two_rounds("methods", &mut out, |emit| {
        for_each_method(walker, resolver, |cell, method| {
            emit(cell, &method.replay_name())
        })
    })?;

    writeln!(out)?;
    Ok(())
}

/// Runs `enumerate` once to count references and once to write them after the count.
fn two_rounds<W, F>(category: &'static str, out: &mut W, mut enumerate: F) -> Result<(), ReplayError>
where
    W: Write,
    F: FnMut(&mut dyn FnMut(usize, &str) -> io::Result<()>) -> Result<(), ReplayError>,
{
    let mut counted = 0;
    enumerate(&mut |_, _| {
        counted += 1;
        Ok(())
    })?;
    write!(out, " {category} {counted}")?;

    let mut emitted = 0;
    enumerate(&mut |cell, name| {
        emitted += 1;
        write!(out, " {cell} {name}")
    })?;

    tracing::debug!(category, counted, emitted, "wrote replay references");
    if counted != emitted {
        return Err(ReplayError::CountMismatch {
            category,
            counted,
            emitted,
        });
    }
    Ok(())
}

/// Every resolvable klass in the main region, followed by the parameter types.
fn for_each_oop<F>(
    walker: &ProfileWalker<'_>,
    resolver: &dyn ObjectResolver,
    mut f: F,
) -> Result<(), ReplayError>
where
    F: FnMut(usize, &Klass) -> io::Result<()>,
{
    let mut visit = |cells: Vec<record::TypeCell>| -> io::Result<()> {
        for cell in cells {
            if let Some(klass) = cell.klass.and_then(|address| resolver.klass(address)) {
                f(cell.cell_index, &klass)?;
            }
        }
        Ok(())
    };
    for record in walker.records() {
        let record = record?;
        match record {
            _ if walker.is_extra(&record) => break,
            ProfileRecord::ParametersType(_) => continue,
            _ => visit(record.type_cells())?,
        }
    }
    if let Some(parameters) = walker.parameters_type_data()? {
        visit(parameters.type_cells())?;
    }
    Ok(())
}

/// Every resolvable method recorded by a speculative trap in the extra data region.
fn for_each_method<F>(
    walker: &ProfileWalker<'_>,
    resolver: &dyn ObjectResolver,
    mut f: F,
) -> Result<(), ReplayError>
where
    F: FnMut(usize, &Method) -> io::Result<()>,
{
    for record in walker.records() {
        let ProfileRecord::SpeculativeTrap(trap) = record? else {
            continue;
        };
        if let Some(method) = trap.resolve_method(resolver) {
            f(trap.method_cell_index(), &method)?;
        }
    }
    Ok(())
}
