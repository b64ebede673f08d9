use super::{out_of_bounds, Region};
use crate::error::StorageResult;
use parking_lot::RwLock;

/// A heap-resident region.
///
/// Growing reallocates and copies; nothing survives the process.
#[derive(Debug)]
pub struct MemoryRegion {
    data: RwLock<Vec<u8>>,
}

impl MemoryRegion {
    /// Creates a zero-filled region of `len` bytes.
    #[must_use]
    pub fn new(len: u64) -> Self {
        Self {
            data: RwLock::new(vec![0; len as usize]),
        }
    }
}

impl Region for MemoryRegion {
    fn size(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        let data = self.data.read();
        let start = offset as usize;
        let end = start.saturating_add(buf.len());
        if end > data.len() {
            return Err(out_of_bounds(offset, buf.len(), data.len() as u64));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start.saturating_add(bytes.len());
        if end > data.len() {
            return Err(out_of_bounds(offset, bytes.len(), data.len() as u64));
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn grow(&self, new_len: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        if new_len as usize > data.len() {
            data.resize(new_len as usize, 0);
        }
        Ok(())
    }

    fn sync(&self, _metadata: bool) -> StorageResult<()> {
        Ok(())
    }

    fn was_created(&self) -> bool {
        true
    }

    fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    fn destroy(&self) -> StorageResult<()> {
        let mut data = self.data.write();
        data.clear();
        data.shrink_to_fit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_write_then_read() {
        let region = MemoryRegion::new(16);
        region.write_at(4, b"data").unwrap();

        let mut buf = [0u8; 4];
        region.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf, b"data");
    }

    #[test]
    fn memory_grow_preserves_contents() {
        let region = MemoryRegion::new(8);
        region.write_at(0, b"keep").unwrap();
        region.grow(64).unwrap();

        assert_eq!(region.size(), 64);
        let mut buf = [0u8; 4];
        region.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"keep");
    }

    #[test]
    fn memory_rejects_out_of_bounds() {
        let region = MemoryRegion::new(8);
        assert!(region.write_at(6, b"four").is_err());
        let mut buf = [0u8; 2];
        assert!(region.read_at(7, &mut buf).is_err());
    }
}
