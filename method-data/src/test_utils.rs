//! Builders for synthetic profiles in tests: a schema for a made-up target build, a profile
//! data builder, and a small VM memory image with classes, methods and compiler-interface
//! profiles. Not part of the decoding API.

use crate::address::Address;
use crate::record::Tag;
use crate::schema::{Endian, ProfileLayout, TypeSchema};

pub const TRAP_HIST_LIMIT: usize = 25;
pub const CI_METHOD_DATA_SIZE: usize = 120;
pub const COMPILER_COUNTERS_SIZE: usize = 40;

pub fn schema(cell_size: usize, endian: Endian) -> TypeSchema {
    let ptr = cell_size;
    let mut schema = TypeSchema::new(cell_size, endian)
        .with_constant("DataLayout::cell_size", cell_size as i64)
        .with_constant("TypeProfileWidth", 2)
        .with_constant("BciProfileWidth", 2)
        .with_constant("MethodData::_trap_hist_limit", TRAP_HIST_LIMIT as i64)
        .with_field("DataLayout", "_header._struct._tag", 0, 1)
        .with_field("DataLayout", "_header._struct._flags", 1, 1)
        .with_field("DataLayout", "_header._struct._bci", 2, 2)
        .with_field("DataLayout", "_header._struct._traps", 4, 4)
        .with_field("DataLayout", "_cells[0]", 8, ptr)
        .with_field("ciMetadata", "_metadata", 8, ptr)
        .with_field("ciMethodData", "_data_size", 16, 4)
        .with_field("ciMethodData", "_extra_data_size", 20, 4)
        .with_field("ciMethodData", "_state", 24, 1)
        .with_field("ciMethodData", "_current_mileage", 28, 4)
        .with_field("ciMethodData", "_data", 32, ptr)
        .with_field("ciMethodData", "_hint_di", 40, 4)
        .with_field("ciMethodData", "_eflags", 48, ptr)
        .with_field("ciMethodData", "_arg_local", 56, ptr)
        .with_field("ciMethodData", "_arg_stack", 64, ptr)
        .with_field("ciMethodData", "_arg_returned", 72, ptr)
        .with_field("ciMethodData", "_orig", 80, COMPILER_COUNTERS_SIZE)
        .with_type_size("ciMethodData", CI_METHOD_DATA_SIZE)
        .with_type_size("MethodData::CompilerCounters", COMPILER_COUNTERS_SIZE)
        .with_field("MethodData::CompilerCounters", "_nof_decompiles", 0, 4)
        .with_field("MethodData::CompilerCounters", "_nof_overflow_recompiles", 4, 4)
        .with_field("MethodData::CompilerCounters", "_nof_overflow_traps", 8, 4)
        .with_field("MethodData::CompilerCounters", "_trap_hist._array[0]", 12, 1)
        .with_field("MethodData", "_method", 8, ptr)
        .with_field("MethodData", "_parameters_type_data_di", 16, 4)
        .with_type_size("MethodData", 32)
        .with_field("Klass", "_name", 16, ptr)
        .with_type_size("Klass", 32)
        .with_field("Symbol", "_length", 4, 2)
        .with_field("Symbol", "_body", 6, 1)
        .with_field("Method", "_constMethod", 8, ptr)
        .with_type_size("Method", 24)
        .with_field("ConstMethod", "_constants", 8, ptr)
        .with_field("ConstMethod", "_name_index", 34, 2)
        .with_field("ConstMethod", "_signature_index", 36, 2)
        .with_type_size("ConstMethod", 40)
        .with_field("ConstantPool", "_pool_holder", 24, ptr)
        .with_type_size("ConstantPool", 64);
    for (code, tag) in Tag::ALL.iter().enumerate() {
        schema = schema.with_constant(tag.constant_name(), code as i64);
    }
    schema
}

pub fn layout(cell_size: usize, endian: Endian) -> ProfileLayout {
    ProfileLayout::from_schema(&schema(cell_size, endian)).expect("fixture schema is complete")
}

/// Builds raw profile data one record at a time.
pub struct DataBuilder<'l> {
    layout: &'l ProfileLayout,
    bytes: Vec<u8>,
    last: usize,
}

impl<'l> DataBuilder<'l> {
    pub fn new(layout: &'l ProfileLayout) -> Self {
        Self {
            layout,
            bytes: Vec::new(),
            last: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    fn put(&mut self, offset: usize, size: usize, value: u64) {
        self.layout
            .endian()
            .write(value, &mut self.bytes[offset..offset + size]);
    }

    pub fn raw_record(mut self, code: u8, bci: u16, cells: &[u64]) -> Self {
        let header = *self.layout.header();
        let cell_size = self.layout.cell_size();
        self.last = self.bytes.len();
        self.bytes
            .resize(self.last + self.layout.size_in_bytes(cells.len()), 0);
        self.put(self.last + header.tag.offset as usize, 1, code as u64);
        self.put(self.last + header.bci.offset as usize, 2, bci as u64);
        for (i, cell) in cells.iter().enumerate() {
            self.put(self.last + self.layout.cell_offset(i), cell_size, *cell);
        }
        self
    }

    pub fn record(self, tag: Tag, bci: u16, cells: &[u64]) -> Self {
        let code = self.layout.tags().code(tag);
        self.raw_record(code, bci, cells)
    }

    /// An empty (`no_tag`) header.
    pub fn empty(self) -> Self {
        self.record(Tag::No, 0, &[])
    }

    pub fn flags(mut self, flags: u8) -> Self {
        let offset = self.last + self.layout.header().flags.offset as usize;
        self.put(offset, 1, flags as u64);
        self
    }

    pub fn traps(mut self, traps: u32) -> Self {
        let offset = self.last + self.layout.header().traps.offset as usize;
        self.put(offset, 4, traps as u64);
        self
    }

    /// Raw bytes that are not a record, e.g. garbage after the extra data terminator.
    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Contents of a compiler-interface profile to place in a [`VmImage`].
pub struct ProfileImage<'a> {
    pub method: Address,
    pub data: &'a [u8],
    pub data_size: usize,
    pub state: u8,
    pub current_mileage: i32,
    pub parameters_type_data_di: i32,
    pub orig: &'a [u8],
}

/// A tiny, bump-allocated image of target memory laid out according to a [`TypeSchema`].
#[derive(Debug, Clone)]
pub struct VmImage {
    schema: TypeSchema,
    base: Address,
    bytes: Vec<u8>,
}

impl VmImage {
    pub fn new(base: Address) -> Self {
        Self::with_schema(base, schema(8, Endian::Little))
    }

    pub fn with_schema(base: Address, schema: TypeSchema) -> Self {
        // Keep offset zero unused so no object lives at the null-looking base.
        Self {
            schema,
            base,
            bytes: vec![0; 16],
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn alloc(&mut self, size: usize) -> Address {
        let start = (self.bytes.len() + 15) & !15;
        self.bytes.resize(start + size, 0);
        self.base + start as u64
    }

    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) {
        let start = (address - self.base) as usize;
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_uint(&mut self, address: Address, size: usize, value: u64) {
        let start = (address - self.base) as usize;
        self.schema
            .endian()
            .write(value, &mut self.bytes[start..start + size]);
    }

    fn set(&mut self, object: Address, ty: &str, field: &str, value: u64) {
        let field = self.schema.field(ty, field).expect("field in schema");
        self.write_uint(object + field.offset, field.size, value);
    }

    /// Like `set`, for fields only some builds have.
    fn set_optional(&mut self, object: Address, ty: &str, field: &str, value: u64) {
        if let Some(field) = self.schema.find_field(ty, field) {
            self.write_uint(object + field.offset, field.size, value);
        }
    }

    fn size_of(&self, ty: &str) -> usize {
        self.schema.type_size(ty).expect("type size in schema")
    }

    pub fn symbol(&mut self, text: &str) -> Address {
        let length = self.schema.field("Symbol", "_length").expect("Symbol::_length");
        let body = self.schema.field("Symbol", "_body").expect("Symbol::_body");
        let symbol = self.alloc(body.offset as usize + text.len());
        self.write_uint(symbol + length.offset, length.size, text.len() as u64);
        self.write_bytes(symbol + body.offset, text.as_bytes());
        symbol
    }

    pub fn klass(&mut self, name: &str) -> Address {
        let symbol = self.symbol(name);
        let klass = self.alloc(self.size_of("Klass"));
        self.set(klass, "Klass", "_name", symbol.offset());
        klass
    }

    pub fn method(&mut self, holder: Address, name: &str, signature: &str) -> Address {
        let word = self.schema.cell_size();
        let header = self.size_of("ConstantPool");
        let pool = self.alloc(header + 3 * word);
        self.set(pool, "ConstantPool", "_pool_holder", holder.offset());
        let name = self.symbol(name);
        let signature = self.symbol(signature);
        self.write_uint(pool + (header + word) as u64, word, name.offset());
        self.write_uint(pool + (header + 2 * word) as u64, word, signature.offset());

        let const_method = self.alloc(self.size_of("ConstMethod"));
        self.set(const_method, "ConstMethod", "_constants", pool.offset());
        self.set(const_method, "ConstMethod", "_name_index", 1);
        self.set(const_method, "ConstMethod", "_signature_index", 2);

        let method = self.alloc(self.size_of("Method"));
        self.set(method, "Method", "_constMethod", const_method.offset());
        method
    }

    /// Places a `MethodData`, its profile data and a `ciMethodData` snapshot of it, returning
    /// the address of the `ciMethodData`.
    pub fn method_data(&mut self, profile: &ProfileImage<'_>) -> Address {
        let method_data = self.alloc(self.size_of("MethodData"));
        self.set(method_data, "MethodData", "_method", profile.method.offset());
        self.set(
            method_data,
            "MethodData",
            "_parameters_type_data_di",
            profile.parameters_type_data_di as u32 as u64,
        );

        let data = self.alloc(profile.data.len());
        self.write_bytes(data, profile.data);

        let ci = self.alloc(self.size_of("ciMethodData"));
        self.set(ci, "ciMetadata", "_metadata", method_data.offset());
        self.set(ci, "ciMethodData", "_data_size", profile.data_size as u64);
        self.set(
            ci,
            "ciMethodData",
            "_extra_data_size",
            (profile.data.len() - profile.data_size) as u64,
        );
        self.set(ci, "ciMethodData", "_state", profile.state as u64);
        self.set(
            ci,
            "ciMethodData",
            "_current_mileage",
            profile.current_mileage as u32 as u64,
        );
        self.set(ci, "ciMethodData", "_data", data.offset());
        self.set_optional(ci, "ciMethodData", "_hint_di", 0);
        let orig = self.schema.field("ciMethodData", "_orig").expect("ciMethodData::_orig");
        self.write_bytes(ci + orig.offset, profile.orig);
        ci
    }
}
