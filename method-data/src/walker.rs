//! Snapshot of one method's profile and traversal of its records.

use crate::address::Address;
use crate::layout::DataLayout;
use crate::memory::MemoryReader;
use crate::record::{self, ArgInfoData, ParametersTypeData, ProfileRecord, Tag};
use crate::resolver::{Method, ObjectResolver};
use crate::schema::{Field, ProfileLayout};
use crate::Error;

/// Maturity of a compiler-interface profile snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum State {
    Empty,
    Immature,
    Mature,
    Unknown(u8),
}

impl State {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Empty,
            1 => Self::Immature,
            2 => Self::Mature,
            n => Self::Unknown(n),
        }
    }

    pub fn raw(&self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Immature => 1,
            Self::Mature => 2,
            Self::Unknown(n) => *n,
        }
    }
}

/// No parameter profile is kept for the method.
pub const NO_PARAMETERS: i32 = -1;
/// Parameter profiling has not been set up yet.
pub const PARAMETERS_UNINITIALIZED: i32 = -2;

/// The raw pieces of a profile, either read from the target or assembled by hand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Address of the `ciMethodData` the snapshot was read from; null when built by hand.
    pub address: Address,
    pub method: Address,
    pub data_size: usize,
    pub state: u8,
    pub current_mileage: i32,
    pub parameters_type_data_di: i32,
    /// Bytes of the compiler counters captured when the snapshot was taken.
    pub orig: Vec<u8>,
    /// Main region followed by the extra data region.
    pub data: Vec<u8>,
    pub hint_di: Option<i64>,
    pub eflags: Option<i64>,
    pub arg_local: Option<i64>,
    pub arg_stack: Option<i64>,
    pub arg_returned: Option<i64>,
}

/// Decoded view of the compiler counters stored in `orig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerCounters {
    pub decompile_count: u32,
    pub overflow_recompile_count: u32,
    pub overflow_trap_count: u32,
    pub trap_hist: Vec<u8>,
}

impl CompilerCounters {
    /// Number of traps recorded for deoptimization reason `reason`, saturated at `u8::MAX`.
    pub fn trap_count(&self, reason: usize) -> Option<u8> {
        self.trap_hist.get(reason).copied()
    }
}

/// A method's profile: the snapshot plus record traversal over it.
///
/// Records live in two regions of one byte buffer. The main region (`data_size` bytes) is a
/// dense sequence of records. The extra data region that follows it holds bit and
/// speculative-trap records interleaved with empty `no_tag` slots, and ends with an arg-info
/// record that fills the rest of the region.
#[derive(Debug, Clone)]
pub struct ProfileWalker<'l> {
    layout: &'l ProfileLayout,
    snapshot: Snapshot,
    words: Vec<u64>,
}

impl<'l> ProfileWalker<'l> {
    /// Validates `snapshot` against `layout`.
    pub fn new(layout: &'l ProfileLayout, snapshot: Snapshot) -> Result<Self, Error> {
        let cell_size = layout.cell_size();
        if snapshot.data.len() % cell_size != 0 {
            return Err(Error::InvalidField {
                field: "data",
                value: snapshot.data.len() as i64,
            });
        }
        if snapshot.data_size > snapshot.data.len() || snapshot.data_size % cell_size != 0 {
            return Err(Error::InvalidField {
                field: "_data_size",
                value: snapshot.data_size as i64,
            });
        }
        let endian = layout.endian();
        let words = snapshot
            .data
            .chunks_exact(cell_size)
            .map(|cell| endian.read(cell))
            .collect();
        Ok(Self {
            layout,
            snapshot,
            words,
        })
    }

    /// Reads the `ciMethodData` at `address`, along with its profile data, out of `memory`.
    pub fn read<M>(memory: &M, layout: &'l ProfileLayout, address: Address) -> Result<Self, Error>
    where
        M: MemoryReader + ?Sized,
    {
        let fields = layout.method_data();
        let endian = layout.endian();
        let int = |field: Field| memory.read_signed_field(address, field, endian);
        let size = |field: Field, name: &'static str| -> Result<usize, Error> {
            let value = int(field)?;
            usize::try_from(value).map_err(|_| Error::InvalidField { field: name, value })
        };

        let data_size = size(fields.data_size, "_data_size")?;
        let extra_data_size = size(fields.extra_data_size, "_extra_data_size")?;
        let metadata = Address::new(memory.read_field(address, fields.metadata, endian)?);
        if metadata.is_null() {
            return Err(Error::InvalidField {
                field: "_metadata",
                value: 0,
            });
        }
        let data = Address::new(memory.read_field(address, fields.data, endian)?);
        let total = data_size
            .checked_add(extra_data_size)
            .ok_or(Error::InvalidField {
                field: "_extra_data_size",
                value: extra_data_size as i64,
            })?;
        let data = match total {
            0 => Vec::new(),
            _ => memory.read_bytes(data, total)?,
        };

        let optional = |field: Option<Field>| field.map(int).transpose();
        let snapshot = Snapshot {
            address,
            method: Address::new(memory.read_field(metadata, fields.method, endian)?),
            data_size,
            state: memory.read_field(address, fields.state, endian)? as u8,
            current_mileage: int(fields.current_mileage)? as i32,
            parameters_type_data_di: memory.read_signed_field(
                metadata,
                fields.parameters_type_data_di,
                endian,
            )? as i32,
            orig: memory.read_bytes(address + fields.orig.offset, fields.orig.size)?,
            data,
            hint_di: optional(fields.hint_di)?,
            eflags: optional(fields.eflags)?,
            arg_local: optional(fields.arg_local)?,
            arg_stack: optional(fields.arg_stack)?,
            arg_returned: optional(fields.arg_returned)?,
        };
        tracing::debug!(
            %address,
            data_size,
            extra_data_size,
            method = %snapshot.method,
            "read method data"
        );
        Self::new(layout, snapshot)
    }

    #[inline]
    pub fn layout(&self) -> &'l ProfileLayout {
        self.layout
    }

    #[inline]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    #[inline]
    pub fn address(&self) -> Address {
        self.snapshot.address
    }

    /// Address of the profiled `Method`.
    #[inline]
    pub fn method_address(&self) -> Address {
        self.snapshot.method
    }

    pub fn method(&self, resolver: &dyn ObjectResolver) -> Option<Method> {
        resolver.method(self.snapshot.method)
    }

    #[inline]
    pub fn data_size(&self) -> usize {
        self.snapshot.data_size
    }

    #[inline]
    pub fn extra_data_size(&self) -> usize {
        self.snapshot.data.len() - self.snapshot.data_size
    }

    #[inline]
    pub fn state(&self) -> State {
        State::from_raw(self.snapshot.state)
    }

    pub fn is_mature(&self) -> bool {
        self.state() == State::Mature
    }

    #[inline]
    pub fn current_mileage(&self) -> i32 {
        self.snapshot.current_mileage
    }

    #[inline]
    pub fn orig_bytes(&self) -> &[u8] {
        &self.snapshot.orig
    }

    /// Every cell of the main and extra data regions, in order.
    #[inline]
    pub fn raw_words(&self) -> &[u64] {
        &self.words
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.snapshot.data
    }

    #[inline]
    pub fn parameters_type_data_di(&self) -> i32 {
        self.snapshot.parameters_type_data_di
    }

    fn cursor(&self, position: usize) -> DataLayout<'_> {
        DataLayout::new(self.layout, &self.snapshot.data, position)
    }

    /// Iterates the main region and then the extra data region.
    ///
    /// The iterator stops after yielding the first error.
    pub fn records(&self) -> Records<'_> {
        Records {
            walker: self,
            walk: Walk::Main(0),
        }
    }

    /// Whether `record` lives in the extra data region.
    pub fn is_extra(&self, record: &ProfileRecord<'_>) -> bool {
        record.position() >= self.data_size()
    }

    /// The method's parameter type profile, if it has one.
    ///
    /// The record sits behind the arg-info record that ends the extra data walk, so
    /// [`Self::records`] never reaches it; it is located through its own index instead.
    pub fn parameters_type_data(&self) -> Result<Option<ParametersTypeData<'_>>, record::Error> {
        let di = self.snapshot.parameters_type_data_di;
        if di == NO_PARAMETERS || di == PARAMETERS_UNINITIALIZED {
            return Ok(None);
        }
        let limit = self.snapshot.data.len();
        let position = usize::try_from(di)
            .ok()
            .filter(|p| *p < limit)
            .ok_or(record::Error::BadIndex { index: di as i64 })?;
        match ProfileRecord::decode(self.cursor(position), limit)? {
            ProfileRecord::ParametersType(parameters) => Ok(Some(parameters)),
            other => Err(record::Error::WrongTag {
                expected: Tag::ParametersType,
                found: other.tag(),
                position,
            }),
        }
    }

    /// The first record for bytecode index `bci`, searching the main region before the extra
    /// data region.
    pub fn bci_to_data(&self, bci: u16) -> Result<Option<ProfileRecord<'_>>, record::Error> {
        for record in self.records() {
            let record = record?;
            if record.bci() == bci && !matches!(record, ProfileRecord::ArgInfo(_)) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// The arg-info record terminating the extra data region, if there is one.
    pub fn arg_info(&self) -> Result<Option<ArgInfoData<'_>>, record::Error> {
        for record in self.records() {
            if let ProfileRecord::ArgInfo(args) = record? {
                return Ok(Some(args));
            }
        }
        Ok(None)
    }

    /// Decodes `orig`, when the schema describes the compiler counters.
    pub fn compiler_counters(&self) -> Option<CompilerCounters> {
        let layout = self.layout.compiler_counters()?;
        let endian = self.layout.endian();
        let orig = &self.snapshot.orig;
        let field = |field: Field| {
            let start = field.offset as usize;
            orig.get(start..start + field.size)
        };
        Some(CompilerCounters {
            decompile_count: endian.read(field(layout.nof_decompiles)?) as u32,
            overflow_recompile_count: endian.read(field(layout.nof_overflow_recompiles)?) as u32,
            overflow_trap_count: endian.read(field(layout.nof_overflow_traps)?) as u32,
            trap_hist: field(layout.trap_hist)?.to_vec(),
        })
    }

    pub fn hint_di(&self) -> Option<i64> {
        self.snapshot.hint_di
    }

    pub fn eflags(&self) -> Option<i64> {
        self.snapshot.eflags
    }

    pub fn arg_local(&self) -> Option<i64> {
        self.snapshot.arg_local
    }

    pub fn arg_stack(&self) -> Option<i64> {
        self.snapshot.arg_stack
    }

    pub fn arg_returned(&self) -> Option<i64> {
        self.snapshot.arg_returned
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Walk {
    Main(usize),
    Extra(usize),
    Done,
}

/// Iterator over the records of a [`ProfileWalker`].
#[derive(Debug, Clone)]
pub struct Records<'w> {
    walker: &'w ProfileWalker<'w>,
    walk: Walk,
}

impl<'w> Records<'w> {
    fn fail(&mut self, error: record::Error) -> Option<Result<ProfileRecord<'w>, record::Error>> {
        tracing::warn!("stopping profile walk: {error}");
        self.walk = Walk::Done;
        Some(Err(error))
    }
}

impl<'w> Iterator for Records<'w> {
    type Item = Result<ProfileRecord<'w>, record::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let walker = self.walker;
        let data_size = walker.data_size();
        let limit = walker.snapshot.data.len();
        loop {
            match self.walk {
                Walk::Main(position) if position >= data_size => {
                    self.walk = Walk::Extra(data_size);
                }
                Walk::Main(position) => {
                    let record = match ProfileRecord::decode(walker.cursor(position), data_size) {
                        Ok(record) => record,
                        Err(e) => return self.fail(e),
                    };
                    tracing::trace!(position, tag = %record.tag(), "decoded record");
                    self.walk = Walk::Main(position + record.size_in_bytes());
                    return Some(Ok(record));
                }
                Walk::Extra(position) if position >= limit => {
                    self.walk = Walk::Done;
                }
                Walk::Extra(position) => {
                    let cursor = walker.cursor(position);
                    let tag = match cursor.tag() {
                        Ok(tag) => tag,
                        Err(e) => return self.fail(e),
                    };
                    match tag {
                        Tag::No => {
                            tracing::trace!(position, "skipping empty extra data slot");
                            self.walk = Walk::Extra(position + walker.layout.cells_offset());
                        }
                        Tag::Bit | Tag::SpeculativeTrap | Tag::ArgInfo => {
                            let record = match ProfileRecord::decode(cursor, limit) {
                                Ok(record) => record,
                                Err(e) => return self.fail(e),
                            };
                            tracing::trace!(position, %tag, "decoded extra record");
                            self.walk = match tag {
                                Tag::ArgInfo => Walk::Done,
                                _ => Walk::Extra(position + record.size_in_bytes()),
                            };
                            return Some(Ok(record));
                        }
                        _ => {
                            let code = walker.layout.tags().code(tag);
                            return self.fail(record::Error::MalformedRecord {
                                tag: code,
                                position,
                            });
                        }
                    }
                }
                Walk::Done => return None,
            }
        }
    }
}

impl std::iter::FusedIterator for Records<'_> {}
