//! Symbolic description of a target build's struct layouts.
//!
//! A [`TypeSchema`] maps `(type, field)` names to byte offsets and sizes, type names to their
//! sizes, and constant names to values, in the same shape a VM exports them through its
//! structs table. It is plain data: load it once per target build (usually from JSON) and resolve
//! it into a [`ProfileLayout`], which is what the decoder actually consumes.

use crate::record::Tag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Byte order of the target process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    /// Reads an unsigned integer of `bytes.len()` (at most eight) bytes.
    pub fn read(&self, bytes: &[u8]) -> u64 {
        debug_assert!(bytes.len() <= 8);
        let mut buffer = [0u8; 8];
        match self {
            Self::Little => {
                buffer[..bytes.len()].copy_from_slice(bytes);
                u64::from_le_bytes(buffer)
            }
            Self::Big => {
                buffer[8 - bytes.len()..].copy_from_slice(bytes);
                u64::from_be_bytes(buffer)
            }
        }
    }

    /// Writes the low `out.len()` bytes of `value`.
    pub fn write(&self, value: u64, out: &mut [u8]) {
        let len = out.len();
        debug_assert!(len <= 8);
        match self {
            Self::Little => out.copy_from_slice(&value.to_le_bytes()[..len]),
            Self::Big => out.copy_from_slice(&value.to_be_bytes()[8 - len..]),
        }
    }
}

/// Sign-extends the low `size` bytes of `value`.
#[inline]
pub fn sign_extend(value: u64, size: usize) -> i64 {
    let shift = 64 - 8 * size.clamp(1, 8) as u32;
    ((value << shift) as i64) >> shift
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub offset: u64,
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default)]
    pub fields: BTreeMap<String, Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    cell_size: usize,
    #[serde(default)]
    endian: Endian,
    #[serde(default)]
    structs: BTreeMap<String, StructType>,
    #[serde(default)]
    constants: BTreeMap<String, i64>,
}

impl TypeSchema {
    pub fn new(cell_size: usize, endian: Endian) -> Self {
        Self {
            cell_size,
            endian,
            structs: BTreeMap::new(),
            constants: BTreeMap::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let schema: Self = serde_json::from_str(json)?;
        schema.check_cell_size()?;
        Ok(schema)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_field(mut self, ty: &str, name: &str, offset: u64, size: usize) -> Self {
        self.structs
            .entry(ty.to_string())
            .or_default()
            .fields
            .insert(name.to_string(), Field { offset, size });
        self
    }

    pub fn with_type_size(mut self, ty: &str, size: usize) -> Self {
        self.structs.entry(ty.to_string()).or_default().size = Some(size);
        self
    }

    pub fn with_constant(mut self, name: &str, value: i64) -> Self {
        self.constants.insert(name.to_string(), value);
        self
    }

    #[inline]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn find_field(&self, ty: &str, name: &str) -> Option<Field> {
        self.structs.get(ty)?.fields.get(name).copied()
    }

    pub fn field(&self, ty: &str, name: &str) -> Result<Field, SchemaError> {
        self.find_field(ty, name)
            .ok_or_else(|| SchemaError::MissingField(ty.to_string(), name.to_string()))
    }

    pub fn type_size(&self, ty: &str) -> Result<usize, SchemaError> {
        self.structs
            .get(ty)
            .and_then(|s| s.size)
            .ok_or_else(|| SchemaError::MissingType(ty.to_string()))
    }

    pub fn find_constant(&self, name: &str) -> Option<i64> {
        self.constants.get(name).copied()
    }

    pub fn constant(&self, name: &str) -> Result<i64, SchemaError> {
        self.find_constant(name)
            .ok_or_else(|| SchemaError::MissingConstant(name.to_string()))
    }

    fn check_cell_size(&self) -> Result<(), SchemaError> {
        match self.cell_size {
            4 | 8 => Ok(()),
            n => Err(SchemaError::CellSize(n)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("schema is missing field {0}::{1}")]
    MissingField(String, String),

    #[error("schema is missing the size of type {0}")]
    MissingType(String),

    #[error("schema is missing constant {0}")]
    MissingConstant(String),

    #[error("unsupported cell size: {0} (expected 4 or 8)")]
    CellSize(usize),

    #[error("constant {name} is {found}, expected {expected}")]
    ConstantMismatch {
        name: String,
        expected: i64,
        found: i64,
    },

    #[error("constant {name} = {value} is out of range")]
    ConstantRange { name: String, value: i64 },

    #[error("tag code {code} is shared by {first} and {second}")]
    DuplicateTag { code: u8, first: Tag, second: Tag },

    #[error("malformed schema")]
    Json(#[from] serde_json::Error),

    #[error("unable to read schema")]
    Io(#[from] std::io::Error),
}

/// Maps the tag byte of a record header to a [`Tag`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagTable {
    by_code: [Option<Tag>; 256],
    codes: [u8; Tag::COUNT],
}

impl TagTable {
    fn from_schema(schema: &TypeSchema) -> Result<Self, SchemaError> {
        let mut by_code = [None; 256];
        let mut codes = [0u8; Tag::COUNT];
        for tag in Tag::ALL {
            let name = tag.constant_name();
            let value = schema.constant(name)?;
            let code = u8::try_from(value).map_err(|_| SchemaError::ConstantRange {
                name: name.to_string(),
                value,
            })?;
            if let Some(first) = by_code[code as usize] {
                return Err(SchemaError::DuplicateTag {
                    code,
                    first,
                    second: tag,
                });
            }
            by_code[code as usize] = Some(tag);
            codes[tag as usize] = code;
        }
        Ok(Self { by_code, codes })
    }

    #[inline]
    pub fn tag(&self, code: u8) -> Option<Tag> {
        self.by_code[code as usize]
    }

    #[inline]
    pub fn code(&self, tag: Tag) -> u8 {
        self.codes[tag as usize]
    }
}

/// Location of the `DataLayout` header fields within a record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeaderLayout {
    pub tag: Field,
    pub flags: Field,
    pub bci: Field,
    pub traps: Field,
}

/// Fields read out of the compiler-interface snapshot of a method's profile.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MethodDataFields {
    pub data_size: Field,
    pub extra_data_size: Field,
    pub state: Field,
    pub current_mileage: Field,
    pub data: Field,
    pub orig: Field,
    pub metadata: Field,
    pub method: Field,
    pub parameters_type_data_di: Field,
    pub hint_di: Option<Field>,
    pub eflags: Option<Field>,
    pub arg_local: Option<Field>,
    pub arg_stack: Option<Field>,
    pub arg_returned: Option<Field>,
}

impl MethodDataFields {
    fn from_schema(schema: &TypeSchema) -> Result<Self, SchemaError> {
        let orig = schema.field("ciMethodData", "_orig")?;
        let orig_size = schema.type_size("MethodData::CompilerCounters")?;
        Ok(Self {
            data_size: schema.field("ciMethodData", "_data_size")?,
            extra_data_size: schema.field("ciMethodData", "_extra_data_size")?,
            state: schema.field("ciMethodData", "_state")?,
            current_mileage: schema.field("ciMethodData", "_current_mileage")?,
            data: schema.field("ciMethodData", "_data")?,
            orig: Field {
                offset: orig.offset,
                size: orig_size,
            },
            metadata: schema.field("ciMetadata", "_metadata")?,
            method: schema.field("MethodData", "_method")?,
            parameters_type_data_di: schema.field("MethodData", "_parameters_type_data_di")?,
            hint_di: schema.find_field("ciMethodData", "_hint_di"),
            eflags: schema.find_field("ciMethodData", "_eflags"),
            arg_local: schema.find_field("ciMethodData", "_arg_local"),
            arg_stack: schema.find_field("ciMethodData", "_arg_stack"),
            arg_returned: schema.find_field("ciMethodData", "_arg_returned"),
        })
    }
}

/// Offsets within `MethodData::CompilerCounters`, the struct captured as `orig`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CompilerCountersLayout {
    pub nof_decompiles: Field,
    pub nof_overflow_recompiles: Field,
    pub nof_overflow_traps: Field,
    pub trap_hist: Field,
}

impl CompilerCountersLayout {
    const TYPE: &'static str = "MethodData::CompilerCounters";

    fn from_schema(schema: &TypeSchema) -> Option<Self> {
        let size = schema.type_size(Self::TYPE).ok()?;
        let hist = schema.find_field(Self::TYPE, "_trap_hist._array[0]")?;
        let len = match schema.find_constant("MethodData::_trap_hist_limit") {
            Some(n) => usize::try_from(n).ok()?,
            None => size.checked_sub(hist.offset as usize)?,
        };
        Some(Self {
            nof_decompiles: schema.find_field(Self::TYPE, "_nof_decompiles")?,
            nof_overflow_recompiles: schema.find_field(Self::TYPE, "_nof_overflow_recompiles")?,
            nof_overflow_traps: schema.find_field(Self::TYPE, "_nof_overflow_traps")?,
            trap_hist: Field {
                offset: hist.offset,
                size: len,
            },
        })
    }
}

/// Everything the decoder needs to know about one target build, resolved from a
/// [`TypeSchema`] up front so that a missing entry fails before any data is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLayout {
    cell_size: usize,
    endian: Endian,
    tags: TagTable,
    header: HeaderLayout,
    cells_offset: usize,
    type_profile_width: usize,
    bci_profile_width: usize,
    method_profile_width: usize,
    receiver0_offset: usize,
    null_seen: u64,
    type_unknown: u64,
    method_data: MethodDataFields,
    counters: Option<CompilerCountersLayout>,
}

impl ProfileLayout {
    pub fn from_schema(schema: &TypeSchema) -> Result<Self, SchemaError> {
        schema.check_cell_size()?;
        let cell_size = schema.cell_size();
        if let Some(found) = schema.find_constant("DataLayout::cell_size") {
            if found != cell_size as i64 {
                return Err(SchemaError::ConstantMismatch {
                    name: "DataLayout::cell_size".to_string(),
                    expected: cell_size as i64,
                    found,
                });
            }
        }

        let header = HeaderLayout {
            tag: schema.field("DataLayout", "_header._struct._tag")?,
            flags: schema.field("DataLayout", "_header._struct._flags")?,
            bci: schema.field("DataLayout", "_header._struct._bci")?,
            traps: schema.field("DataLayout", "_header._struct._traps")?,
        };
        let cells_offset = schema.field("DataLayout", "_cells[0]")?.offset as usize;
        if cells_offset == 0 || cells_offset % cell_size != 0 {
            return Err(SchemaError::ConstantRange {
                name: "DataLayout::_cells[0]".to_string(),
                value: cells_offset as i64,
            });
        }

        let width = |name: &str, default: Option<i64>| -> Result<usize, SchemaError> {
            let value = match default {
                Some(d) => schema.find_constant(name).unwrap_or(d),
                None => schema.constant(name)?,
            };
            usize::try_from(value).map_err(|_| SchemaError::ConstantRange {
                name: name.to_string(),
                value,
            })
        };

        let layout = Self {
            cell_size,
            endian: schema.endian(),
            tags: TagTable::from_schema(schema)?,
            header,
            cells_offset,
            type_profile_width: width("TypeProfileWidth", None)?,
            bci_profile_width: width("BciProfileWidth", None)?,
            method_profile_width: width("MethodProfileWidth", Some(0))?,
            // JVMCI builds keep a nonprofiled count between the counter and the receiver rows.
            receiver0_offset: 1 + usize::from(width("INCLUDE_JVMCI", Some(0))? != 0),
            null_seen: width("TypeEntries::null_seen", Some(1))? as u64,
            type_unknown: width("TypeEntries::type_unknown", Some(2))? as u64,
            method_data: MethodDataFields::from_schema(schema)?,
            counters: CompilerCountersLayout::from_schema(schema),
        };
        tracing::debug!(
            cell_size,
            cells_offset,
            type_profile_width = layout.type_profile_width,
            bci_profile_width = layout.bci_profile_width,
            "resolved profile layout"
        );
        Ok(layout)
    }

    #[inline]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    #[inline]
    pub fn tags(&self) -> &TagTable {
        &self.tags
    }

    #[inline]
    pub fn header(&self) -> &HeaderLayout {
        &self.header
    }

    /// Size of the record header in bytes; cell 0 of a record starts here.
    #[inline]
    pub fn cells_offset(&self) -> usize {
        self.cells_offset
    }

    /// Byte offset of cell `index` from the start of a record.
    #[inline]
    pub fn cell_offset(&self, index: usize) -> usize {
        self.cells_offset + index * self.cell_size
    }

    /// Size in bytes of a record with `cells` cells after its header.
    #[inline]
    pub fn size_in_bytes(&self, cells: usize) -> usize {
        self.cell_offset(cells)
    }

    #[inline]
    pub fn type_profile_width(&self) -> usize {
        self.type_profile_width
    }

    #[inline]
    pub fn bci_profile_width(&self) -> usize {
        self.bci_profile_width
    }

    #[inline]
    pub fn method_profile_width(&self) -> usize {
        self.method_profile_width
    }

    /// Cell of the first receiver row in the receiver-type family of records.
    #[inline]
    pub fn receiver0_offset(&self) -> usize {
        self.receiver0_offset
    }

    #[inline]
    pub(crate) fn null_seen_mask(&self) -> u64 {
        self.null_seen
    }

    #[inline]
    pub(crate) fn type_unknown_mask(&self) -> u64 {
        self.type_unknown
    }

    #[inline]
    pub fn method_data(&self) -> &MethodDataFields {
        &self.method_data
    }

    #[inline]
    pub fn compiler_counters(&self) -> Option<&CompilerCountersLayout> {
        self.counters.as_ref()
    }
}
