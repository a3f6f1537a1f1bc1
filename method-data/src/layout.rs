use crate::record::{Error, Tag};
use crate::schema::{sign_extend, Field, ProfileLayout};

/// Cursor over a single record in a snapshot of profile data.
///
/// # Format
///
/// `| header: tag u8, flags u8, bci u16, traps u32 | cells: [word] |`
///
/// The header occupies [`ProfileLayout::cells_offset`] bytes (one cell on 64-bit targets, two
/// on 32-bit ones); the exact placement of each header field comes from the schema. A cursor is
/// a plain position: it never moves, [`DataLayout::at`] produces a new one.
#[derive(Debug, Copy, Clone)]
pub struct DataLayout<'d> {
    layout: &'d ProfileLayout,
    data: &'d [u8],
    position: usize,
}

impl<'d> DataLayout<'d> {
    #[inline]
    pub fn new(layout: &'d ProfileLayout, data: &'d [u8], position: usize) -> Self {
        Self {
            layout,
            data,
            position,
        }
    }

    /// A cursor over the same data at another byte position.
    #[inline]
    pub fn at(&self, position: usize) -> Self {
        Self {
            position,
            ..*self
        }
    }

    #[inline]
    pub fn layout(&self) -> &'d ProfileLayout {
        self.layout
    }

    #[inline]
    pub fn data(&self) -> &'d [u8] {
        self.data
    }

    /// Byte offset of the record within the profile data.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn position_in_cells(&self) -> usize {
        self.position / self.layout.cell_size()
    }

    /// Word index (into the whole profile data) of cell `index` of this record.
    #[inline]
    pub fn cell_index(&self, index: usize) -> usize {
        (self.position + self.layout.cell_offset(index)) / self.layout.cell_size()
    }

    fn bytes(&self, offset: usize, size: usize) -> Result<&'d [u8], Error> {
        let start = self.position.checked_add(offset);
        start
            .and_then(|start| self.data.get(start..start.checked_add(size)?))
            .ok_or(Error::Truncated {
                position: self.position,
                offset,
            })
    }

    fn header_field(&self, field: Field) -> Result<u64, Error> {
        let bytes = self.bytes(field.offset as usize, field.size)?;
        Ok(self.layout.endian().read(bytes))
    }

    /// Raw tag byte from the header.
    #[inline]
    pub fn tag_code(&self) -> Result<u8, Error> {
        Ok(self.header_field(self.layout.header().tag)? as u8)
    }

    /// Tag of the record at this position, failing on a code the schema does not know.
    pub fn tag(&self) -> Result<Tag, Error> {
        let code = self.tag_code()?;
        self.layout
            .tags()
            .tag(code)
            .ok_or(Error::MalformedRecord {
                tag: code,
                position: self.position,
            })
    }

    pub fn flags(&self) -> Result<u8, Error> {
        Ok(self.header_field(self.layout.header().flags)? as u8)
    }

    pub fn bci(&self) -> Result<u16, Error> {
        Ok(self.header_field(self.layout.header().bci)? as u16)
    }

    pub fn trap_state(&self) -> Result<u32, Error> {
        Ok(self.header_field(self.layout.header().traps)? as u32)
    }

    /// Raw value of cell `index`, zero-extended to 64 bits.
    pub fn cell(&self, index: usize) -> Result<u64, Error> {
        let offset = self.layout.cell_offset(index);
        let bytes = self.bytes(offset, self.layout.cell_size())?;
        Ok(self.layout.endian().read(bytes))
    }

    /// Cell `index` as a signed machine word.
    pub fn int_at(&self, index: usize) -> Result<i64, Error> {
        Ok(sign_extend(self.cell(index)?, self.layout.cell_size()))
    }

    /// Cell `index` truncated to 32 bits.
    pub fn uint_at(&self, index: usize) -> Result<u32, Error> {
        Ok(self.cell(index)? as u32)
    }

    /// Checks that a record of `size` bytes at this position ends within `limit`.
    pub(crate) fn check_size(&self, size: usize, limit: usize) -> Result<(), Error> {
        match self.position.checked_add(size) {
            Some(end) if end <= limit && end <= self.data.len() => Ok(()),
            _ => Err(Error::RecordOverrun {
                position: self.position,
                size,
                limit: limit.min(self.data.len()),
            }),
        }
    }

    /// Cell `index` of a record whose extent was already validated by [`Self::check_size`].
    #[inline]
    pub(crate) fn word(&self, index: usize) -> u64 {
        let start = self.position + self.layout.cell_offset(index);
        self.layout
            .endian()
            .read(&self.data[start..start + self.layout.cell_size()])
    }

    #[inline]
    pub(crate) fn signed_word(&self, index: usize) -> i64 {
        sign_extend(self.word(index), self.layout.cell_size())
    }

    /// Counter cells saturate to the 32-bit range when read.
    #[inline]
    pub(crate) fn counter(&self, index: usize) -> i32 {
        self.signed_word(index)
            .clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{layout, DataBuilder};
    use crate::schema::Endian;

    #[test]
    fn decodes_header_in_both_byte_orders() {
        for endian in [Endian::Little, Endian::Big] {
            for cell_size in [4, 8] {
                let layout = layout(cell_size, endian);
                let data = DataBuilder::new(&layout)
                    .record(Tag::Counter, 37, &[42])
                    .flags(0x5)
                    .traps(0x0102_0304)
                    .build();
                let cursor = DataLayout::new(&layout, &data, 0);
                assert_eq!(cursor.tag().unwrap(), Tag::Counter);
                assert_eq!(cursor.bci().unwrap(), 37);
                assert_eq!(cursor.flags().unwrap(), 0x5);
                assert_eq!(cursor.trap_state().unwrap(), 0x0102_0304);
                assert_eq!(cursor.cell(0).unwrap(), 42);
                assert_eq!(cursor.cell_index(0), 8 / cell_size);
            }
        }
    }

    #[test]
    fn signed_and_truncated_cells() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout)
            .record(Tag::Jump, 0, &[(-8i64) as u64, 0x1_0000_0003])
            .build();
        let cursor = DataLayout::new(&layout, &data, 0);
        assert_eq!(cursor.int_at(0).unwrap(), -8);
        assert_eq!(cursor.uint_at(1).unwrap(), 3);
        assert_eq!(cursor.counter(1), i32::MAX);
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout).raw_record(0x7f, 0, &[]).build();
        let cursor = DataLayout::new(&layout, &data, 0);
        assert!(matches!(
            cursor.tag(),
            Err(Error::MalformedRecord {
                tag: 0x7f,
                position: 0
            })
        ));
    }

    #[test]
    fn reads_past_the_end_are_truncated() {
        let layout = layout(8, Endian::Little);
        let data = DataBuilder::new(&layout).record(Tag::Bit, 0, &[]).build();
        let cursor = DataLayout::new(&layout, &data, 0);
        assert!(matches!(cursor.cell(0), Err(Error::Truncated { .. })));
        assert!(matches!(
            cursor.at(data.len()).tag(),
            Err(Error::Truncated { .. })
        ));
        assert!(cursor.check_size(16, data.len()).is_err());
        assert!(cursor.check_size(8, data.len()).is_ok());
    }
}
