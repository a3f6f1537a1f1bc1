use crate::address::Address;
use crate::layout::DataLayout;
use crate::resolver::{Klass, Method, ObjectResolver};
use crate::schema::ProfileLayout;

/// Enumeration of the record kinds a profile can contain.
///
/// The numeric codes stored in record headers are build specific and come from the schema's
/// `DataLayout::*_tag` constants; the discriminants here only index the [`TagTable`].
///
/// [`TagTable`]: crate::schema::TagTable
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    No = 0,
    Bit = 1,
    Counter = 2,
    Jump = 3,
    ReceiverType = 4,
    VirtualCall = 5,
    Ret = 6,
    Branch = 7,
    MultiBranch = 8,
    ArgInfo = 9,
    CallType = 10,
    VirtualCallType = 11,
    ParametersType = 12,
    SpeculativeTrap = 13,
}

impl Tag {
    pub const COUNT: usize = 14;

    pub const ALL: [Tag; Tag::COUNT] = [
        Tag::No,
        Tag::Bit,
        Tag::Counter,
        Tag::Jump,
        Tag::ReceiverType,
        Tag::VirtualCall,
        Tag::Ret,
        Tag::Branch,
        Tag::MultiBranch,
        Tag::ArgInfo,
        Tag::CallType,
        Tag::VirtualCallType,
        Tag::ParametersType,
        Tag::SpeculativeTrap,
    ];

    /// Name of the schema constant holding this tag's code.
    pub fn constant_name(&self) -> &'static str {
        match self {
            Self::No => "DataLayout::no_tag",
            Self::Bit => "DataLayout::bit_data_tag",
            Self::Counter => "DataLayout::counter_data_tag",
            Self::Jump => "DataLayout::jump_data_tag",
            Self::ReceiverType => "DataLayout::receiver_type_data_tag",
            Self::VirtualCall => "DataLayout::virtual_call_data_tag",
            Self::Ret => "DataLayout::ret_data_tag",
            Self::Branch => "DataLayout::branch_data_tag",
            Self::MultiBranch => "DataLayout::multi_branch_data_tag",
            Self::ArgInfo => "DataLayout::arg_info_data_tag",
            Self::CallType => "DataLayout::call_type_data_tag",
            Self::VirtualCallType => "DataLayout::virtual_call_type_data_tag",
            Self::ParametersType => "DataLayout::parameters_type_data_tag",
            Self::SpeculativeTrap => "DataLayout::speculative_trap_data_tag",
        }
    }

    pub fn record_name(&self) -> &'static str {
        match self {
            Self::No => "NoData",
            Self::Bit => "BitData",
            Self::Counter => "CounterData",
            Self::Jump => "JumpData",
            Self::ReceiverType => "ReceiverTypeData",
            Self::VirtualCall => "VirtualCallData",
            Self::Ret => "RetData",
            Self::Branch => "BranchData",
            Self::MultiBranch => "MultiBranchData",
            Self::ArgInfo => "ArgInfoData",
            Self::CallType => "CallTypeData",
            Self::VirtualCallType => "VirtualCallTypeData",
            Self::ParametersType => "ParametersTypeData",
            Self::SpeculativeTrap => "SpeculativeTrapData",
        }
    }

    /// Number of cells after the header for tags whose size does not depend on their contents.
    pub fn fixed_cell_count(&self, layout: &ProfileLayout) -> Option<usize> {
        let receiver_cells = layout.receiver0_offset() + 2 * layout.type_profile_width();
        match self {
            Self::No | Self::Bit => Some(0),
            Self::Counter => Some(1),
            Self::Jump => Some(2),
            Self::Branch => Some(3),
            Self::Ret => Some(1 + 3 * layout.bci_profile_width()),
            Self::ReceiverType => Some(receiver_cells),
            Self::VirtualCall => Some(receiver_cells + 2 * layout.method_profile_width()),
            Self::SpeculativeTrap => Some(1),
            Self::MultiBranch
            | Self::ArgInfo
            | Self::CallType
            | Self::VirtualCallType
            | Self::ParametersType => None,
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.record_name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed record: unknown tag {tag} at byte {position}")]
    MalformedRecord { tag: u8, position: usize },

    #[error("record at byte {position} ({size} bytes) runs past byte {limit}")]
    RecordOverrun {
        position: usize,
        size: usize,
        limit: usize,
    },

    #[error("record at byte {position} is truncated (offset {offset})")]
    Truncated { position: usize, offset: usize },

    #[error("expected a {expected} record at byte {position}, found {found}")]
    WrongTag {
        expected: Tag,
        found: Tag,
        position: usize,
    },

    #[error("invalid record index {index}")]
    BadIndex { index: i64 },
}

impl Error {
    /// Tag byte and position of a record that could not be decoded, if that is what failed.
    pub fn malformed(&self) -> Option<(u8, usize)> {
        match self {
            Self::MalformedRecord { tag, position } => Some((*tag, *position)),
            _ => None,
        }
    }
}

/// A record's cursor together with its decoded header and validated size.
#[derive(Debug, Copy, Clone)]
pub struct RecordView<'d> {
    cursor: DataLayout<'d>,
    tag: Tag,
    flags: u8,
    bci: u16,
    trap_state: u32,
    size: usize,
}

impl<'d> RecordView<'d> {
    /// Reads the header at `cursor` and computes the record's size, checking that the record
    /// ends at or before `limit`.
    pub fn decode(cursor: DataLayout<'d>, limit: usize) -> Result<Self, Error> {
        let tag = cursor.tag()?;
        let layout = cursor.layout();
        let cells = match tag.fixed_cell_count(layout) {
            Some(cells) => cells,
            None => {
                let (count_cell, fixed) = match tag {
                    Tag::CallType => (1, 2),
                    Tag::VirtualCallType => {
                        let base = Tag::VirtualCall.fixed_cell_count(layout).unwrap_or(0);
                        (base, base + 1)
                    }
                    _ => (0, 1),
                };
                fixed + cursor.uint_at(count_cell)? as usize
            }
        };
        let size = cells
            .checked_mul(layout.cell_size())
            .and_then(|n| n.checked_add(layout.cells_offset()))
            .ok_or(Error::RecordOverrun {
                position: cursor.position(),
                size: usize::MAX,
                limit,
            })?;
        cursor.check_size(size, limit)?;
        Ok(Self {
            cursor,
            tag,
            flags: cursor.flags()?,
            bci: cursor.bci()?,
            trap_state: cursor.trap_state()?,
            size,
        })
    }

    #[inline]
    pub fn cursor(&self) -> &DataLayout<'d> {
        &self.cursor
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Tests header flag bit `flag`.
    #[inline]
    pub fn flag_at(&self, flag: u8) -> bool {
        flag < 8 && self.flags & (1 << flag) != 0
    }

    #[inline]
    pub fn bci(&self) -> u16 {
        self.bci
    }

    #[inline]
    pub fn trap_state(&self) -> u32 {
        self.trap_state
    }

    /// Byte offset of the record within the profile data.
    #[inline]
    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    #[inline]
    pub fn position_in_cells(&self) -> usize {
        self.cursor.position_in_cells()
    }

    #[inline]
    pub fn size_in_bytes(&self) -> usize {
        self.size
    }

    /// Number of cells following the header.
    #[inline]
    pub fn cell_count(&self) -> usize {
        (self.size - self.cursor.layout().cells_offset()) / self.cursor.layout().cell_size()
    }

    /// Word index of cell `index` within the whole profile data.
    #[inline]
    pub fn cell_index(&self, index: usize) -> usize {
        self.cursor.cell_index(index)
    }

    #[inline]
    fn word(&self, index: usize) -> u64 {
        debug_assert!(index < self.cell_count());
        self.cursor.word(index)
    }

    #[inline]
    fn signed(&self, index: usize) -> i64 {
        self.cursor.signed_word(index)
    }

    #[inline]
    fn uint(&self, index: usize) -> u32 {
        self.word(index) as u32
    }

    #[inline]
    fn counter(&self, index: usize) -> i32 {
        self.cursor.counter(index)
    }

    #[inline]
    fn address(&self, index: usize) -> Option<Address> {
        Address::new(self.word(index)).non_null()
    }

    fn type_entry(&self, index: usize) -> TypeEntry {
        let layout = self.cursor.layout();
        TypeEntry {
            raw: self.word(index),
            cell_index: self.cell_index(index),
            null_seen: layout.null_seen_mask(),
            type_unknown: layout.type_unknown_mask(),
        }
    }
}

/// A cell holding a klass reference, as enumerated for serialization.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TypeCell {
    /// Word index of the cell within the whole profile data.
    pub cell_index: usize,
    /// The klass referenced by the cell, or `None` when nothing is recorded.
    pub klass: Option<Address>,
}

/// One entry of a call-site argument, return or parameter type profile.
///
/// The low bits of the cell are status flags (`null_seen`, `type_unknown`); the rest is the
/// klass pointer, zero while no type has been recorded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    raw: u64,
    cell_index: usize,
    null_seen: u64,
    type_unknown: u64,
}

impl TypeEntry {
    #[inline]
    pub fn raw(&self) -> u64 {
        self.raw
    }

    #[inline]
    pub fn cell_index(&self) -> usize {
        self.cell_index
    }

    #[inline]
    pub fn null_seen(&self) -> bool {
        self.raw & self.null_seen != 0
    }

    /// More than one type was seen.
    #[inline]
    pub fn is_unknown(&self) -> bool {
        self.raw & self.type_unknown != 0
    }

    /// No type recorded yet.
    #[inline]
    pub fn is_none(&self) -> bool {
        self.klass_part() == 0
    }

    #[inline]
    fn klass_part(&self) -> u64 {
        self.raw & !(self.null_seen | self.type_unknown)
    }

    /// The single klass recorded in this entry, if there is one.
    pub fn klass(&self) -> Option<Address> {
        if self.is_unknown() {
            return None;
        }
        Address::new(self.klass_part()).non_null()
    }

    pub fn valid_klass(&self, resolver: &dyn ObjectResolver) -> Option<Klass> {
        resolver.klass(self.klass()?)
    }

    fn as_type_cell(&self) -> TypeCell {
        TypeCell {
            cell_index: self.cell_index,
            klass: self.klass(),
        }
    }
}

/// `(stack slot, type)` pairs starting at cell `base` of a record.
#[derive(Debug, Copy, Clone)]
pub struct TypeStackSlotEntries<'d> {
    record: RecordView<'d>,
    base: usize,
    len: usize,
}

impl<'d> TypeStackSlotEntries<'d> {
    pub const PER_ARG_CELLS: usize = 2;

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stack_slot(&self, i: usize) -> u32 {
        assert!(i < self.len, "type entry {i} out of range");
        self.record.uint(self.base + i * Self::PER_ARG_CELLS)
    }

    pub fn type_entry(&self, i: usize) -> TypeEntry {
        assert!(i < self.len, "type entry {i} out of range");
        self.record
            .type_entry(self.base + i * Self::PER_ARG_CELLS + 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, TypeEntry)> + 'd {
        let entries = *self;
        (0..self.len).map(move |i| (entries.stack_slot(i), entries.type_entry(i)))
    }
}

/// One row of a receiver type histogram.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReceiverRow {
    pub row: usize,
    /// `None` while the row is unused.
    pub receiver: Option<Address>,
    pub count: u32,
    pub cell_index: usize,
}

macro_rules! record_struct {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone)]
        pub struct $name<'d>(RecordView<'d>);

        impl<'d> $name<'d> {
            #[inline]
            pub fn view(&self) -> &RecordView<'d> {
                &self.0
            }
        }
    };
}

record_struct!(
    /// A record with no cells; its only payload is the header (bci, flags, trap state).
    BitData
);
record_struct!(
    /// Invocation or execution counter.
    CounterData
);
record_struct!(
    /// Unconditional jump: taken count and branch displacement.
    JumpData
);
record_struct!(
    /// Conditional branch: jump data plus a not-taken count.
    BranchData
);
record_struct!(
    /// Return-address profile for `ret`: a counter plus `(bci, count, displacement)` rows.
    RetData
);
record_struct!(
    /// Receiver type histogram for type checks: a counter plus `(receiver, count)` rows.
    ReceiverTypeData
);
record_struct!(
    /// Receiver type histogram at a virtual call site.
    VirtualCallData
);
record_struct!(
    /// Call-site argument and return type profile.
    CallTypeData
);
record_struct!(
    /// Virtual call receiver histogram plus argument and return type profile.
    VirtualCallTypeData
);
record_struct!(
    /// Profile for `tableswitch`/`lookupswitch`: default and per-case counts and displacements.
    MultiBranchData
);
record_struct!(
    /// Per-argument "modified" flags; always the last record of the extra data region.
    ArgInfoData
);
record_struct!(
    /// Method parameter types; reached only through the parameters index.
    ParametersTypeData
);
record_struct!(
    /// Method in which a speculative trap was recorded.
    SpeculativeTrapData
);

impl BitData<'_> {
    pub const NULL_SEEN_FLAG: u8 = 0;

    pub fn null_seen(&self) -> bool {
        self.0.flag_at(Self::NULL_SEEN_FLAG)
    }
}

impl CounterData<'_> {
    pub fn count(&self) -> i32 {
        self.0.counter(0)
    }
}

impl JumpData<'_> {
    pub fn taken(&self) -> u32 {
        self.0.uint(0)
    }

    pub fn displacement(&self) -> i64 {
        self.0.signed(1)
    }
}

impl BranchData<'_> {
    pub fn taken(&self) -> u32 {
        self.0.uint(0)
    }

    pub fn displacement(&self) -> i64 {
        self.0.signed(1)
    }

    pub fn not_taken(&self) -> u32 {
        self.0.uint(2)
    }
}

impl RetData<'_> {
    pub const NO_BCI: i64 = -1;

    pub fn count(&self) -> i32 {
        self.0.counter(0)
    }

    pub fn row_limit(&self) -> usize {
        self.0.cursor().layout().bci_profile_width()
    }

    /// Bytecode index returned to through row `row`, or [`Self::NO_BCI`] while unused.
    pub fn bci(&self, row: usize) -> i64 {
        assert!(row < self.row_limit(), "ret row {row} out of range");
        self.0.signed(1 + row * 3)
    }

    pub fn bci_count(&self, row: usize) -> u32 {
        assert!(row < self.row_limit(), "ret row {row} out of range");
        self.0.uint(2 + row * 3)
    }

    pub fn bci_displacement(&self, row: usize) -> i64 {
        assert!(row < self.row_limit(), "ret row {row} out of range");
        self.0.signed(3 + row * 3)
    }
}

/// Shared `(receiver, count)` row layout of the receiver-type family.
fn receiver_rows<'d>(record: RecordView<'d>) -> impl Iterator<Item = ReceiverRow> + 'd {
    let layout = record.cursor().layout();
    let base = layout.receiver0_offset();
    (0..layout.type_profile_width()).map(move |row| ReceiverRow {
        row,
        receiver: record.address(base + row * 2),
        count: record.uint(base + 1 + row * 2),
        cell_index: record.cell_index(base + row * 2),
    })
}

/// Argument/return type entries following the count cell at `count_cell`.
fn call_type_entries<'d>(
    record: &RecordView<'d>,
    count_cell: usize,
) -> (TypeStackSlotEntries<'d>, Option<TypeEntry>) {
    let cells = record.uint(count_cell) as usize;
    let args = TypeStackSlotEntries {
        record: *record,
        base: count_cell + 1,
        len: cells / TypeStackSlotEntries::PER_ARG_CELLS,
    };
    let ret = (cells % TypeStackSlotEntries::PER_ARG_CELLS != 0)
        .then(|| record.type_entry(count_cell + cells));
    (args, ret)
}

macro_rules! receiver_type_accessors {
    ($name:ident) => {
        impl<'d> $name<'d> {
            pub fn count(&self) -> i32 {
                self.0.counter(0)
            }

            pub fn row_limit(&self) -> usize {
                self.0.cursor().layout().type_profile_width()
            }

            fn receiver_base(&self) -> usize {
                self.0.cursor().layout().receiver0_offset()
            }

            /// Calls whose receiver type was not recorded; only JVMCI builds keep this cell.
            pub fn nonprofiled_count(&self) -> Option<u32> {
                (self.receiver_base() > 1).then(|| self.0.uint(1))
            }

            /// Receiver klass of row `row`; `None` while the row is unused.
            pub fn receiver(&self, row: usize) -> Option<Address> {
                assert!(row < self.row_limit(), "receiver row {row} out of range");
                self.0.address(self.receiver_base() + row * 2)
            }

            pub fn receiver_count(&self, row: usize) -> u32 {
                assert!(row < self.row_limit(), "receiver row {row} out of range");
                self.0.uint(self.receiver_base() + 1 + row * 2)
            }

            pub fn rows(&self) -> impl Iterator<Item = ReceiverRow> + 'd {
                receiver_rows(self.0)
            }

            pub fn resolve_receiver(
                &self,
                row: usize,
                resolver: &dyn ObjectResolver,
            ) -> Option<Klass> {
                resolver.klass(self.receiver(row)?)
            }
        }
    };
}

receiver_type_accessors!(ReceiverTypeData);
receiver_type_accessors!(VirtualCallData);
receiver_type_accessors!(VirtualCallTypeData);

macro_rules! virtual_call_method_accessors {
    ($name:ident) => {
        impl<'d> $name<'d> {
            /// Number of `(method, count)` rows, zero unless the build profiles call targets.
            pub fn method_row_limit(&self) -> usize {
                self.0.cursor().layout().method_profile_width()
            }

            fn method_base(&self) -> usize {
                self.receiver_base() + 2 * self.row_limit()
            }

            pub fn method(&self, row: usize) -> Option<Address> {
                assert!(row < self.method_row_limit(), "method row {row} out of range");
                self.0.address(self.method_base() + row * 2)
            }

            pub fn method_count(&self, row: usize) -> u32 {
                assert!(row < self.method_row_limit(), "method row {row} out of range");
                self.0.uint(self.method_base() + row * 2 + 1)
            }
        }
    };
}

virtual_call_method_accessors!(VirtualCallData);
virtual_call_method_accessors!(VirtualCallTypeData);

impl<'d> CallTypeData<'d> {
    const COUNT_CELL: usize = 1;

    pub fn count(&self) -> i32 {
        self.0.counter(0)
    }

    pub fn arguments(&self) -> TypeStackSlotEntries<'d> {
        call_type_entries(&self.0, Self::COUNT_CELL).0
    }

    pub fn has_arguments(&self) -> bool {
        !self.arguments().is_empty()
    }

    pub fn return_type(&self) -> Option<TypeEntry> {
        call_type_entries(&self.0, Self::COUNT_CELL).1
    }

    pub fn has_return(&self) -> bool {
        self.return_type().is_some()
    }
}

impl<'d> VirtualCallTypeData<'d> {
    fn count_cell(&self) -> usize {
        self.method_base() + 2 * self.method_row_limit()
    }

    pub fn arguments(&self) -> TypeStackSlotEntries<'d> {
        call_type_entries(&self.0, self.count_cell()).0
    }

    pub fn has_arguments(&self) -> bool {
        !self.arguments().is_empty()
    }

    pub fn return_type(&self) -> Option<TypeEntry> {
        call_type_entries(&self.0, self.count_cell()).1
    }

    pub fn has_return(&self) -> bool {
        self.return_type().is_some()
    }
}

impl MultiBranchData<'_> {
    pub fn number_of_cases(&self) -> usize {
        (self.0.uint(0) as usize).saturating_sub(2) / 2
    }

    pub fn default_count(&self) -> u32 {
        self.0.uint(1)
    }

    pub fn default_displacement(&self) -> i64 {
        self.0.signed(2)
    }

    pub fn count_at(&self, case: usize) -> u32 {
        assert!(case < self.number_of_cases(), "case {case} out of range");
        self.0.uint(3 + case * 2)
    }

    pub fn displacement_at(&self, case: usize) -> i64 {
        assert!(case < self.number_of_cases(), "case {case} out of range");
        self.0.signed(4 + case * 2)
    }
}

impl ArgInfoData<'_> {
    pub fn number_of_args(&self) -> usize {
        self.0.uint(0) as usize
    }

    /// Bit set of ways argument `arg` was modified.
    pub fn arg_modified(&self, arg: usize) -> u32 {
        assert!(arg < self.number_of_args(), "argument {arg} out of range");
        self.0.uint(1 + arg)
    }
}

impl<'d> ParametersTypeData<'d> {
    pub fn parameters(&self) -> TypeStackSlotEntries<'d> {
        TypeStackSlotEntries {
            record: self.0,
            base: 1,
            len: self.0.uint(0) as usize / TypeStackSlotEntries::PER_ARG_CELLS,
        }
    }

    pub fn number_of_parameters(&self) -> usize {
        self.parameters().len()
    }

    pub fn type_cells(&self) -> Vec<TypeCell> {
        self.parameters()
            .iter()
            .map(|(_, entry)| entry.as_type_cell())
            .collect()
    }
}

impl SpeculativeTrapData<'_> {
    /// Method the trap was recorded in; `None` when no method was recorded.
    pub fn method(&self) -> Option<Address> {
        self.0.address(0)
    }

    pub fn method_cell_index(&self) -> usize {
        self.0.cell_index(0)
    }

    pub fn resolve_method(&self, resolver: &dyn ObjectResolver) -> Option<Method> {
        resolver.method(self.method()?)
    }
}

/// A decoded profile record.
#[derive(Debug, Copy, Clone)]
pub enum ProfileRecord<'d> {
    Bit(BitData<'d>),
    Counter(CounterData<'d>),
    Jump(JumpData<'d>),
    Branch(BranchData<'d>),
    MultiBranch(MultiBranchData<'d>),
    Ret(RetData<'d>),
    ReceiverType(ReceiverTypeData<'d>),
    VirtualCall(VirtualCallData<'d>),
    CallType(CallTypeData<'d>),
    VirtualCallType(VirtualCallTypeData<'d>),
    ParametersType(ParametersTypeData<'d>),
    SpeculativeTrap(SpeculativeTrapData<'d>),
    ArgInfo(ArgInfoData<'d>),
}

impl<'d> ProfileRecord<'d> {
    /// Decodes the record at `cursor`, which must end at or before byte `limit`.
    ///
    /// Fails with [`Error::MalformedRecord`] for a tag the schema does not know and for `no_tag`,
    /// which marks an empty slot rather than a record.
    pub fn decode(cursor: DataLayout<'d>, limit: usize) -> Result<Self, Error> {
        let view = RecordView::decode(cursor, limit)?;
        Ok(match view.tag() {
            Tag::No => {
                return Err(Error::MalformedRecord {
                    tag: cursor.layout().tags().code(Tag::No),
                    position: cursor.position(),
                })
            }
            Tag::Bit => Self::Bit(BitData(view)),
            Tag::Counter => Self::Counter(CounterData(view)),
            Tag::Jump => Self::Jump(JumpData(view)),
            Tag::Branch => Self::Branch(BranchData(view)),
            Tag::MultiBranch => Self::MultiBranch(MultiBranchData(view)),
            Tag::Ret => Self::Ret(RetData(view)),
            Tag::ReceiverType => Self::ReceiverType(ReceiverTypeData(view)),
            Tag::VirtualCall => Self::VirtualCall(VirtualCallData(view)),
            Tag::CallType => Self::CallType(CallTypeData(view)),
            Tag::VirtualCallType => Self::VirtualCallType(VirtualCallTypeData(view)),
            Tag::ParametersType => Self::ParametersType(ParametersTypeData(view)),
            Tag::SpeculativeTrap => Self::SpeculativeTrap(SpeculativeTrapData(view)),
            Tag::ArgInfo => Self::ArgInfo(ArgInfoData(view)),
        })
    }

    pub fn view(&self) -> &RecordView<'d> {
        match self {
            Self::Bit(record) => record.view(),
            Self::Counter(record) => record.view(),
            Self::Jump(record) => record.view(),
            Self::Branch(record) => record.view(),
            Self::MultiBranch(record) => record.view(),
            Self::Ret(record) => record.view(),
            Self::ReceiverType(record) => record.view(),
            Self::VirtualCall(record) => record.view(),
            Self::CallType(record) => record.view(),
            Self::VirtualCallType(record) => record.view(),
            Self::ParametersType(record) => record.view(),
            Self::SpeculativeTrap(record) => record.view(),
            Self::ArgInfo(record) => record.view(),
        }
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        self.view().tag()
    }

    #[inline]
    pub fn bci(&self) -> u16 {
        self.view().bci()
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.view().position()
    }

    #[inline]
    pub fn size_in_bytes(&self) -> usize {
        self.view().size_in_bytes()
    }

    /// The record's counter cell, for the kinds that start with one.
    pub fn count(&self) -> Option<i32> {
        match self {
            Self::Counter(r) => Some(r.count()),
            Self::Ret(r) => Some(r.count()),
            Self::ReceiverType(r) => Some(r.count()),
            Self::VirtualCall(r) => Some(r.count()),
            Self::CallType(r) => Some(r.count()),
            Self::VirtualCallType(r) => Some(r.count()),
            _ => None,
        }
    }

    /// Every klass-holding cell of the record in layout order: receiver rows first, then
    /// argument types, then the return type.
    pub fn type_cells(&self) -> Vec<TypeCell> {
        match self {
            Self::ReceiverType(r) => receiver_cells(*r.view()),
            Self::VirtualCall(r) => receiver_cells(*r.view()),
            Self::CallType(r) => call_type_cells(r.arguments(), r.return_type()),
            Self::VirtualCallType(r) => {
                let mut cells = receiver_cells(*r.view());
                cells.extend(call_type_cells(r.arguments(), r.return_type()));
                cells
            }
            Self::ParametersType(r) => r.type_cells(),
            _ => Vec::new(),
        }
    }
}

fn receiver_cells(view: RecordView<'_>) -> Vec<TypeCell> {
    receiver_rows(view)
        .map(|row| TypeCell {
            cell_index: row.cell_index,
            klass: row.receiver,
        })
        .collect()
}

fn call_type_cells(args: TypeStackSlotEntries<'_>, ret: Option<TypeEntry>) -> Vec<TypeCell> {
    args.iter()
        .map(|(_, entry)| entry)
        .chain(ret)
        .map(|entry| entry.as_type_cell())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::SymbolTable;
    use crate::schema::Endian;
    use crate::test_utils::{self, layout, DataBuilder};

    fn decode_one<'d>(layout: &'d ProfileLayout, data: &'d [u8]) -> ProfileRecord<'d> {
        ProfileRecord::decode(DataLayout::new(layout, data, 0), data.len()).unwrap()
    }

    #[test]
    fn fixed_sizes() {
        let layout = layout(8, Endian::Little);
        let cases = [
            (Tag::Bit, 8),
            (Tag::Counter, 16),
            (Tag::Jump, 24),
            (Tag::Branch, 32),
            (Tag::Ret, 8 + 7 * 8),
            (Tag::ReceiverType, 8 + 5 * 8),
            (Tag::VirtualCall, 8 + 5 * 8),
            (Tag::SpeculativeTrap, 16),
        ];
        for (tag, size) in cases {
            let cells = vec![0; tag.fixed_cell_count(&layout).unwrap()];
            let data = DataBuilder::new(&layout).record(tag, 1, &cells).build();
            let record = decode_one(&layout, &data);
            assert_eq!(record.tag(), tag);
            assert_eq!(record.size_in_bytes(), size, "{tag}");
        }
    }

    #[test]
    fn counter_and_branch_fields() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout)
            .record(Tag::Branch, 12, &[5, (-16i64) as u64, 9])
            .build();
        let ProfileRecord::Branch(branch) = decode_one(&layout, &data) else {
            panic!("expected branch data");
        };
        assert_eq!(branch.taken(), 5);
        assert_eq!(branch.displacement(), -16);
        assert_eq!(branch.not_taken(), 9);
        assert_eq!(branch.view().bci(), 12);
    }

    #[test]
    fn counter_saturates() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout)
            .record(Tag::Counter, 0, &[(i32::MAX as u64) + 10])
            .build();
        assert_eq!(decode_one(&layout, &data).count(), Some(i32::MAX));
    }

    #[test]
    fn receiver_rows_treat_zero_as_unused() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout)
            .record(Tag::ReceiverType, 3, &[1, 0, 0, 0x1000, 7])
            .build();
        let record = decode_one(&layout, &data);
        let ProfileRecord::ReceiverType(receivers) = record else {
            panic!("expected receiver type data");
        };
        assert_eq!(receivers.receiver(0), None);
        assert_eq!(receivers.receiver(1), Some(Address::new(0x1000)));
        assert_eq!(receivers.receiver_count(1), 7);

        let resolver = SymbolTable::new().with_klass(Address::new(0x1000), "A");
        assert_eq!(receivers.resolve_receiver(0, &resolver), None);
        assert_eq!(
            receivers.resolve_receiver(1, &resolver).unwrap().name(),
            "A"
        );
        assert_eq!(
            record.type_cells(),
            vec![
                TypeCell {
                    cell_index: 2,
                    klass: None
                },
                TypeCell {
                    cell_index: 4,
                    klass: Some(Address::new(0x1000))
                },
            ]
        );
    }

    #[test]
    fn call_type_with_arguments_and_return() {
        let layout = layout(8, Endian::Little);
        // count, 5 cells: 2 args of (slot, type) and a return type
        let data = DataBuilder::new(&layout)
            .record(Tag::CallType, 4, &[3, 5, 0, 0x2001, 1, 0x3002, 0x4000])
            .build();
        let record = decode_one(&layout, &data);
        assert_eq!(record.size_in_bytes(), 8 + 7 * 8);
        let ProfileRecord::CallType(call) = record else {
            panic!("expected call type data");
        };
        assert_eq!(call.count(), 3);
        let args = call.arguments();
        assert_eq!(args.len(), 2);
        assert_eq!(args.stack_slot(1), 1);
        assert!(args.type_entry(0).null_seen());
        assert_eq!(args.type_entry(0).klass(), Some(Address::new(0x2000)));
        assert!(args.type_entry(1).is_unknown());
        assert_eq!(args.type_entry(1).klass(), None);
        let ret = call.return_type().unwrap();
        assert_eq!(ret.klass(), Some(Address::new(0x4000)));
        assert_eq!(ret.cell_index(), 7);
        assert_eq!(
            record.type_cells().iter().filter_map(|c| c.klass).count(),
            2
        );
    }

    #[test]
    fn call_type_without_return() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout)
            .record(Tag::CallType, 4, &[0, 2, 0, 0])
            .build();
        let ProfileRecord::CallType(call) = decode_one(&layout, &data) else {
            panic!("expected call type data");
        };
        assert!(call.has_arguments());
        assert!(!call.has_return());
        assert!(call.arguments().type_entry(0).is_none());
    }

    #[test]
    fn virtual_call_type_layout() {
        let layout = layout(8, Endian::Little);
        // count, 2 receiver rows, cell count 1 (return only), return type
        let data = DataBuilder::new(&layout)
            .record(Tag::VirtualCallType, 9, &[2, 0x1000, 2, 0, 0, 1, 0x5000])
            .build();
        let record = decode_one(&layout, &data);
        assert_eq!(record.size_in_bytes(), 8 + 7 * 8);
        let ProfileRecord::VirtualCallType(call) = record else {
            panic!("expected virtual call type data");
        };
        assert_eq!(call.receiver(0), Some(Address::new(0x1000)));
        assert!(!call.has_arguments());
        assert_eq!(
            call.return_type().unwrap().klass(),
            Some(Address::new(0x5000))
        );
        let cells = record.type_cells();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[2].cell_index, 7);
    }

    #[test]
    fn jvmci_receiver_rows_follow_the_nonprofiled_count() {
        let schema = test_utils::schema(8, Endian::Little)
            .with_constant("INCLUDE_JVMCI", 1)
            .with_constant("MethodProfileWidth", 1);
        let layout = ProfileLayout::from_schema(&schema).unwrap();
        // count, nonprofiled count, 2 receiver rows, 1 method row
        let data = DataBuilder::new(&layout)
            .record(Tag::VirtualCall, 3, &[9, 4, 0x1000, 5, 0, 0, 0x9000, 2])
            .record(Tag::ReceiverType, 7, &[1, 0, 0, 0, 0x2000, 1])
            // count, nonprofiled count, 2 receiver rows, 1 method row, cell count 1, return type
            .record(
                Tag::VirtualCallType,
                11,
                &[3, 0, 0x1000, 3, 0, 0, 0, 0, 1, 0x3000],
            )
            .build();

        let first = ProfileRecord::decode(DataLayout::new(&layout, &data, 0), data.len()).unwrap();
        assert_eq!(first.size_in_bytes(), 8 + 8 * 8);
        let ProfileRecord::VirtualCall(call) = first else {
            panic!("expected virtual call data");
        };
        assert_eq!(call.count(), 9);
        assert_eq!(call.nonprofiled_count(), Some(4));
        assert_eq!(call.receiver(0), Some(Address::new(0x1000)));
        assert_eq!(call.receiver_count(0), 5);
        assert_eq!(call.receiver(1), None);
        assert_eq!(call.method(0), Some(Address::new(0x9000)));
        assert_eq!(call.method_count(0), 2);
        assert_eq!(
            first.type_cells(),
            vec![
                TypeCell {
                    cell_index: 3,
                    klass: Some(Address::new(0x1000))
                },
                TypeCell {
                    cell_index: 5,
                    klass: None
                },
            ]
        );

        let second =
            ProfileRecord::decode(DataLayout::new(&layout, &data, 72), data.len()).unwrap();
        assert_eq!(second.size_in_bytes(), 8 + 6 * 8);
        assert_eq!(second.bci(), 7);
        let ProfileRecord::ReceiverType(receivers) = second else {
            panic!("expected receiver type data");
        };
        assert_eq!(receivers.receiver(1), Some(Address::new(0x2000)));
        assert_eq!(receivers.receiver_count(1), 1);

        let third =
            ProfileRecord::decode(DataLayout::new(&layout, &data, 128), data.len()).unwrap();
        assert_eq!(third.size_in_bytes(), 8 + 10 * 8);
        assert_eq!(third.position() + third.size_in_bytes(), data.len());
        let ProfileRecord::VirtualCallType(call) = third else {
            panic!("expected virtual call type data");
        };
        assert_eq!(call.receiver(0), Some(Address::new(0x1000)));
        assert_eq!(call.receiver_count(0), 3);
        assert!(!call.has_arguments());
        assert_eq!(
            call.return_type().unwrap().klass(),
            Some(Address::new(0x3000))
        );
    }

    #[test]
    fn non_jvmci_builds_have_no_nonprofiled_count() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout)
            .record(Tag::VirtualCall, 0, &[1, 0x1000, 1, 0, 0])
            .build();
        let ProfileRecord::VirtualCall(call) = decode_one(&layout, &data) else {
            panic!("expected virtual call data");
        };
        assert_eq!(call.nonprofiled_count(), None);
        assert_eq!(call.receiver(0), Some(Address::new(0x1000)));
    }

    #[test]
    fn multi_branch_and_arg_info() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout)
            .record(Tag::MultiBranch, 20, &[4, 10, 32, 6, 48])
            .build();
        let record = decode_one(&layout, &data);
        assert_eq!(record.size_in_bytes(), 8 + 5 * 8);
        let ProfileRecord::MultiBranch(switch) = record else {
            panic!("expected multi branch data");
        };
        assert_eq!(switch.number_of_cases(), 1);
        assert_eq!(switch.default_count(), 10);
        assert_eq!(switch.count_at(0), 6);
        assert_eq!(switch.displacement_at(0), 48);

        let data = DataBuilder::new(&layout)
            .record(Tag::ArgInfo, 0, &[2, 0, 3])
            .build();
        let ProfileRecord::ArgInfo(args) = decode_one(&layout, &data) else {
            panic!("expected arg info data");
        };
        assert_eq!(args.number_of_args(), 2);
        assert_eq!(args.arg_modified(1), 3);
    }

    #[test]
    fn ret_rows() {
        let layout = layout(4, Endian::Big);
        let data = DataBuilder::new(&layout)
            .record(Tag::Ret, 0, &[1, 14, 3, 20, 0xffff_ffff, 0, 0])
            .build();
        let ProfileRecord::Ret(ret) = decode_one(&layout, &data) else {
            panic!("expected ret data");
        };
        assert_eq!(ret.bci(0), 14);
        assert_eq!(ret.bci_count(0), 3);
        assert_eq!(ret.bci_displacement(0), 20);
        assert_eq!(ret.bci(1), RetData::NO_BCI);
    }

    #[test]
    fn oversized_count_overruns() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout)
            .record(Tag::ParametersType, 0, &[1000])
            .build();
        assert!(matches!(
            ProfileRecord::decode(DataLayout::new(&layout, &data, 0), data.len()),
            Err(Error::RecordOverrun { position: 0, .. })
        ));
    }

    #[test]
    fn no_tag_is_not_a_record() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout).empty().build();
        assert!(matches!(
            ProfileRecord::decode(DataLayout::new(&layout, &data, 0), data.len()),
            Err(Error::MalformedRecord { tag: 0, position: 0 })
        ));
    }

    #[test]
    fn speculative_trap_method() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout)
            .record(Tag::SpeculativeTrap, 5, &[0])
            .record(Tag::SpeculativeTrap, 6, &[0x9000])
            .build();
        let resolver = SymbolTable::new().with_method(Address::new(0x9000), "A", "m", "()V");
        let first = ProfileRecord::decode(DataLayout::new(&layout, &data, 0), data.len()).unwrap();
        let second =
            ProfileRecord::decode(DataLayout::new(&layout, &data, 16), data.len()).unwrap();
        let (ProfileRecord::SpeculativeTrap(first), ProfileRecord::SpeculativeTrap(second)) =
            (first, second)
        else {
            panic!("expected speculative trap data");
        };
        assert_eq!(first.method(), None);
        assert_eq!(first.resolve_method(&resolver), None);
        assert_eq!(second.method_cell_index(), 3);
        assert_eq!(
            second.resolve_method(&resolver).unwrap().replay_name(),
            "A m ()V"
        );
    }
}
