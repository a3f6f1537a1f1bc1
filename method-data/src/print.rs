//! Human readable dump of a profile, one block per record.

use crate::address::Address;
use crate::record::{ProfileRecord, RetData, TypeEntry, TypeStackSlotEntries};
use crate::resolver::ObjectResolver;
use crate::walker::ProfileWalker;
use crate::Error;
use std::io::Write;

/// Writes every record of `walker`, main region first, followed by the parameter types.
pub fn print_data<W: Write>(
    walker: &ProfileWalker<'_>,
    resolver: &dyn ObjectResolver,
    mut out: W,
) -> Result<(), Error> {
    match walker.method(resolver) {
        Some(method) => writeln!(out, "ciMethodData {method}")?,
        None => writeln!(out, "ciMethodData {}", walker.method_address())?,
    }
    writeln!(
        out,
        "  state: {:?}  mileage: {}  data: {} bytes  extra data: {} bytes",
        walker.state(),
        walker.current_mileage(),
        walker.data_size(),
        walker.extra_data_size()
    )?;
    if let Some(counters) = walker.compiler_counters() {
        writeln!(
            out,
            "  decompiles: {}  overflow recompiles: {}  overflow traps: {}",
            counters.decompile_count,
            counters.overflow_recompile_count,
            counters.overflow_trap_count
        )?;
    }

    let mut extra = false;
    for record in walker.records() {
        let record = record?;
        if !extra && walker.is_extra(&record) {
            extra = true;
            writeln!(out, "--- Extra data:")?;
        }
        print_record(&record, resolver, &mut out)?;
    }

    if let Some(parameters) = walker.parameters_type_data()? {
        writeln!(out, "--- Parameters:")?;
        print_entries(&parameters.parameters(), "param", resolver, &mut out)?;
    }
    Ok(())
}

fn print_record<W: Write>(
    record: &ProfileRecord<'_>,
    resolver: &dyn ObjectResolver,
    out: &mut W,
) -> Result<(), Error> {
    let view = record.view();
    write!(
        out,
        "{:<4} bci: {:<5} {:<20}",
        view.position_in_cells(),
        view.bci(),
        view.tag()
    )?;
    if let Some(count) = record.count() {
        write!(out, " count({count})")?;
    }
    match record {
        ProfileRecord::Bit(bit) => {
            if bit.null_seen() {
                write!(out, " null_seen")?;
            }
        }
        ProfileRecord::Counter(_) | ProfileRecord::ArgInfo(_) => {}
        ProfileRecord::Jump(jump) => {
            write!(
                out,
                " taken({}) displacement({})",
                jump.taken(),
                jump.displacement()
            )?;
        }
        ProfileRecord::Branch(branch) => {
            write!(
                out,
                " taken({}) displacement({}) not taken({})",
                branch.taken(),
                branch.displacement(),
                branch.not_taken()
            )?;
        }
        ProfileRecord::MultiBranch(switch) => {
            write!(
                out,
                " default_count({}) displacement({})",
                switch.default_count(),
                switch.default_displacement()
            )?;
        }
        ProfileRecord::SpeculativeTrap(trap) => {
            write!(out, " method({})", method_name(trap.method(), resolver))?;
        }
        ProfileRecord::ReceiverType(receivers) => {
            if let Some(count) = receivers.nonprofiled_count() {
                write!(out, " nonprofiled_count({count})")?;
            }
        }
        ProfileRecord::VirtualCall(call) => {
            if let Some(count) = call.nonprofiled_count() {
                write!(out, " nonprofiled_count({count})")?;
            }
        }
        ProfileRecord::VirtualCallType(call) => {
            if let Some(count) = call.nonprofiled_count() {
                write!(out, " nonprofiled_count({count})")?;
            }
        }
        ProfileRecord::Ret(_) | ProfileRecord::CallType(_) | ProfileRecord::ParametersType(_) => {}
    }
    if view.trap_state() != 0 {
        write!(out, " trap_state({:#x})", view.trap_state())?;
    }
    writeln!(out)?;

    match record {
        ProfileRecord::MultiBranch(switch) => {
            for case in 0..switch.number_of_cases() {
                writeln!(
                    out,
                    "      case {case}: count({}) displacement({})",
                    switch.count_at(case),
                    switch.displacement_at(case)
                )?;
            }
        }
        ProfileRecord::Ret(ret) => {
            for row in 0..ret.row_limit() {
                if ret.bci(row) == RetData::NO_BCI {
                    continue;
                }
                writeln!(
                    out,
                    "      bci({}): count({}) displacement({})",
                    ret.bci(row),
                    ret.bci_count(row),
                    ret.bci_displacement(row)
                )?;
            }
        }
        ProfileRecord::ReceiverType(receivers) => {
            for row in receivers.rows() {
                print_receiver(row.receiver, row.count, resolver, out)?;
            }
        }
        ProfileRecord::VirtualCall(call) => {
            for row in call.rows() {
                print_receiver(row.receiver, row.count, resolver, out)?;
            }
            for row in 0..call.method_row_limit() {
                if let Some(method) = call.method(row) {
                    let name = method_name(Some(method), resolver);
                    writeln!(out, "      method {name}({})", call.method_count(row))?;
                }
            }
        }
        ProfileRecord::CallType(call) => {
            print_entries(&call.arguments(), "arg", resolver, out)?;
            if let Some(ret) = call.return_type() {
                writeln!(out, "      ret: {}", describe(&ret, resolver))?;
            }
        }
        ProfileRecord::VirtualCallType(call) => {
            for row in call.rows() {
                print_receiver(row.receiver, row.count, resolver, out)?;
            }
            print_entries(&call.arguments(), "arg", resolver, out)?;
            if let Some(ret) = call.return_type() {
                writeln!(out, "      ret: {}", describe(&ret, resolver))?;
            }
        }
        ProfileRecord::ParametersType(parameters) => {
            print_entries(&parameters.parameters(), "param", resolver, out)?;
        }
        ProfileRecord::ArgInfo(args) => {
            for arg in 0..args.number_of_args() {
                writeln!(out, "      arg {arg}: modified({:#x})", args.arg_modified(arg))?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn print_receiver<W: Write>(
    receiver: Option<Address>,
    count: u32,
    resolver: &dyn ObjectResolver,
    out: &mut W,
) -> Result<(), Error> {
    let Some(address) = receiver else {
        return Ok(());
    };
    let name = match resolver.klass(address) {
        Some(klass) => klass.name().to_string(),
        None => format!("{address} (unresolved)"),
    };
    writeln!(out, "      {name}({count})")?;
    Ok(())
}

fn print_entries<W: Write>(
    entries: &TypeStackSlotEntries<'_>,
    label: &str,
    resolver: &dyn ObjectResolver,
    out: &mut W,
) -> Result<(), Error> {
    for (i, (slot, entry)) in entries.iter().enumerate() {
        writeln!(
            out,
            "      {label} {i} (slot {slot}): {}",
            describe(&entry, resolver)
        )?;
    }
    Ok(())
}

fn describe(entry: &TypeEntry, resolver: &dyn ObjectResolver) -> String {
    let mut text = if entry.is_unknown() {
        String::from("unknown")
    } else {
        match entry.klass() {
            None => String::from("none"),
            Some(address) => match resolver.klass(address) {
                Some(klass) => klass.name().to_string(),
                None => format!("{address} (unresolved)"),
            },
        }
    };
    if entry.null_seen() {
        text.push_str(" (null seen)");
    }
    text
}

fn method_name(method: Option<Address>, resolver: &dyn ObjectResolver) -> String {
    match method {
        None => String::from("none"),
        Some(address) => match resolver.method(address) {
            Some(method) => method.to_string(),
            None => format!("{address} (unresolved)"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Tag;
    use crate::resolver::SymbolTable;
    use crate::schema::{Endian, ProfileLayout};
    use crate::test_utils::{self, layout, DataBuilder};
    use crate::walker::{Snapshot, PARAMETERS_UNINITIALIZED};

    fn dump(snapshot: Snapshot) -> String {
        let layout = layout(8, Endian::Little);
        let walker = ProfileWalker::new(&layout, snapshot).unwrap();
        let symbols = SymbolTable::new()
            .with_method(Address::new(0x9000), "Foo", "bar", "(I)V")
            .with_klass(Address::new(0x1000), "java/lang/String");
        let mut out = Vec::new();
        print_data(&walker, &symbols, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn prints_main_and_extra_records() {
        let layout = layout(8, Endian::Little);
        let main = DataBuilder::new(&layout)
            .record(Tag::Branch, 7, &[3, 24, 1])
            .record(Tag::ReceiverType, 9, &[2, 0x1000, 5, 0x4242, 1])
            .traps(0x10)
            .build();
        let data = DataBuilder::new(&layout)
            .bytes(&main)
            .record(Tag::SpeculativeTrap, 11, &[0x9000])
            .record(Tag::ArgInfo, 0, &[1, 2])
            .build();
        let text = dump(Snapshot {
            method: Address::new(0x9000),
            data_size: main.len(),
            data,
            state: 1,
            parameters_type_data_di: PARAMETERS_UNINITIALIZED,
            ..Snapshot::default()
        });

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ciMethodData Foo.bar(I)V");
        assert!(lines[1].contains("state: Immature"), "{text}");
        assert!(lines[2].starts_with("0    bci: 7     BranchData"), "{text}");
        assert!(lines[2].ends_with("taken(3) displacement(24) not taken(1)"));
        assert!(lines[3].contains("ReceiverTypeData") && lines[3].contains("count(2)"));
        assert!(lines[3].ends_with("trap_state(0x10)"));
        assert_eq!(lines[4].trim(), "java/lang/String(5)");
        assert_eq!(lines[5].trim(), "0x4242 (unresolved)(1)");
        assert_eq!(lines[6], "--- Extra data:");
        assert!(lines[7].ends_with("method(Foo.bar(I)V)"));
        assert!(lines[8].contains("ArgInfoData"));
        assert_eq!(lines[9].trim(), "arg 0: modified(0x2)");
        assert_eq!(lines.len(), 10);
    }

    #[test]
    fn prints_nonprofiled_counts_on_jvmci_builds() {
        let schema = test_utils::schema(8, Endian::Little).with_constant("INCLUDE_JVMCI", 1);
        let layout = ProfileLayout::from_schema(&schema).unwrap();
        let data = DataBuilder::new(&layout)
            .record(Tag::VirtualCall, 5, &[6, 2, 0x1000, 4, 0, 0])
            .build();
        let walker = ProfileWalker::new(
            &layout,
            Snapshot {
                data_size: data.len(),
                data,
                parameters_type_data_di: PARAMETERS_UNINITIALIZED,
                ..Snapshot::default()
            },
        )
        .unwrap();
        let symbols = SymbolTable::new().with_klass(Address::new(0x1000), "java/lang/String");
        let mut out = Vec::new();
        print_data(&walker, &symbols, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[2].ends_with("count(6) nonprofiled_count(2)"), "{text}");
        assert_eq!(lines[3].trim(), "java/lang/String(4)");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn prints_parameters_and_type_entries() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout)
            .record(Tag::CallType, 2, &[1, 3, 0, 0x1001, 0x2])
            .record(Tag::ArgInfo, 0, &[0])
            .record(Tag::ParametersType, 0, &[2, 0, 0])
            .build();
        let text = dump(Snapshot {
            method: Address::new(0x4000),
            data_size: 48,
            data,
            parameters_type_data_di: 64,
            ..Snapshot::default()
        });
        assert!(text.starts_with("ciMethodData 0x4000\n"), "{text}");
        assert!(text.contains("arg 0 (slot 0): java/lang/String (null seen)\n"));
        assert!(text.contains("ret: unknown\n"));
        assert!(text.ends_with("--- Parameters:\n      param 0 (slot 0): none\n"));
    }
}
