use crate::address::Address;
use crate::schema::{sign_extend, Endian, Field};
use std::path::Path;
use std::{fs, io};

/// Random-access reads from a (paused) target process.
///
/// Implementations only need [`MemoryReader::read`]; the sized helpers are built on top of it.
pub trait MemoryReader {
    /// Fills `buffer` with the bytes starting at `address`, failing if any byte is unreadable.
    fn read(&self, address: Address, buffer: &mut [u8]) -> Result<(), MemoryError>;

    fn read_bytes(&self, address: Address, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut buffer = vec![0u8; len];
        self.read(address, &mut buffer)?;
        Ok(buffer)
    }

    /// Reads an unsigned integer of `size` bytes (at most eight).
    fn read_uint(&self, address: Address, size: usize, endian: Endian) -> Result<u64, MemoryError> {
        let mut buffer = [0u8; 8];
        let size = size.min(8);
        self.read(address, &mut buffer[..size])?;
        Ok(endian.read(&buffer[..size]))
    }

    fn read_int(&self, address: Address, size: usize, endian: Endian) -> Result<i64, MemoryError> {
        Ok(sign_extend(self.read_uint(address, size, endian)?, size))
    }

    /// Reads the unsigned value of `field` in the struct at `base`.
    fn read_field(&self, base: Address, field: Field, endian: Endian) -> Result<u64, MemoryError> {
        self.read_uint(base + field.offset, field.size, endian)
    }

    /// Reads the sign-extended value of `field` in the struct at `base`.
    fn read_signed_field(
        &self,
        base: Address,
        field: Field,
        endian: Endian,
    ) -> Result<i64, MemoryError> {
        self.read_int(base + field.offset, field.size, endian)
    }
}

impl<M: MemoryReader + ?Sized> MemoryReader for &M {
    fn read(&self, address: Address, buffer: &mut [u8]) -> Result<(), MemoryError> {
        (**self).read(address, buffer)
    }

    fn read_bytes(&self, address: Address, len: usize) -> Result<Vec<u8>, MemoryError> {
        (**self).read_bytes(address, len)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("unable to read {len} bytes at {address}")]
    Unmapped { address: Address, len: usize },

    #[error("IO Error:")]
    Io(#[from] io::Error),
}

/// A set of non-overlapping memory images, each placed at a base address.
#[derive(Debug, Default)]
pub struct Segments<T> {
    segments: Vec<(Address, T)>,
}

/// Memory backed by owned byte buffers.
pub type SliceMemory = Segments<Vec<u8>>;

/// Memory backed by memory-mapped image files.
pub type MappedMemory = Segments<memmap::Mmap>;

impl<T: AsRef<[u8]>> Segments<T> {
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Places `bytes` at `base`. Later segments win where they overlap earlier ones.
    pub fn insert(&mut self, base: Address, bytes: T) {
        self.segments.insert(0, (base, bytes));
    }

    pub fn with_segment(mut self, base: Address, bytes: T) -> Self {
        self.insert(base, bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn find(&self, address: Address, len: usize) -> Option<&[u8]> {
        self.segments.iter().find_map(|(base, bytes)| {
            let bytes = bytes.as_ref();
            if address < *base {
                return None;
            }
            let start = usize::try_from(address - *base).ok()?;
            bytes.get(start..start.checked_add(len)?)
        })
    }
}

impl MappedMemory {
    /// Maps the file at `path` read-only and places it at `base`.
    ///
    /// # Safety
    ///
    /// The file must not be modified or truncated while it is mapped.
    pub unsafe fn map<P: AsRef<Path>>(&mut self, base: Address, path: P) -> io::Result<()> {
        let file = fs::File::open(path)?;
        let mmap = memmap::Mmap::map(&file)?;
        tracing::debug!(%base, len = mmap.len(), "mapped memory image");
        self.insert(base, mmap);
        Ok(())
    }
}

impl<T: AsRef<[u8]>> MemoryReader for Segments<T> {
    fn read(&self, address: Address, buffer: &mut [u8]) -> Result<(), MemoryError> {
        let bytes = self.find(address, buffer.len()).ok_or(MemoryError::Unmapped {
            address,
            len: buffer.len(),
        })?;
        buffer.copy_from_slice(bytes);
        Ok(())
    }

    /// Checks the range is mapped before allocating, so a corrupt length fails cleanly.
    fn read_bytes(&self, address: Address, len: usize) -> Result<Vec<u8>, MemoryError> {
        self.find(address, len)
            .map(<[u8]>::to_vec)
            .ok_or(MemoryError::Unmapped { address, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_within_a_segment() {
        let memory = SliceMemory::new().with_segment(Address::new(0x1000), vec![1, 2, 3, 4, 5]);
        assert_eq!(memory.read_bytes(Address::new(0x1001), 3).unwrap(), [2, 3, 4]);
        assert_eq!(
            memory
                .read_uint(Address::new(0x1000), 2, Endian::Little)
                .unwrap(),
            0x0201
        );
        assert_eq!(
            memory.read_uint(Address::new(0x1000), 2, Endian::Big).unwrap(),
            0x0102
        );
    }

    #[test]
    fn reads_crossing_the_end_fail() {
        let memory = SliceMemory::new().with_segment(Address::new(0x1000), vec![0; 4]);
        assert!(matches!(
            memory.read_bytes(Address::new(0x1002), 4),
            Err(MemoryError::Unmapped { len: 4, .. })
        ));
        assert!(memory.read_bytes(Address::new(0xfff), 1).is_err());
    }

    #[test]
    fn huge_reads_fail_without_allocating() {
        let memory = SliceMemory::new().with_segment(Address::new(0x1000), vec![0; 4]);
        assert!(matches!(
            memory.read_bytes(Address::new(0x1000), usize::MAX),
            Err(MemoryError::Unmapped { len: usize::MAX, .. })
        ));
        assert!(matches!(
            memory.read_bytes(Address::new(0x1002), isize::MAX as usize),
            Err(MemoryError::Unmapped { .. })
        ));
    }

    #[test]
    fn signed_fields_sign_extend() {
        let memory =
            SliceMemory::new().with_segment(Address::new(0x10), vec![0xff, 0xff, 0xff, 0xff]);
        let field = Field { offset: 0, size: 4 };
        assert_eq!(
            memory
                .read_signed_field(Address::new(0x10), field, Endian::Little)
                .unwrap(),
            -1
        );
        assert_eq!(
            memory
                .read_field(Address::new(0x10), field, Endian::Little)
                .unwrap(),
            0xffff_ffff
        );
    }

    #[test]
    fn maps_image_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xaa, 0xbb, 0xcc]).unwrap();
        file.flush().unwrap();

        let mut memory = MappedMemory::new();
        unsafe { memory.map(Address::new(0x4000), file.path()).unwrap() };
        assert_eq!(memory.read_bytes(Address::new(0x4001), 2).unwrap(), [0xbb, 0xcc]);
    }
}
