//! Heap-backed page storage.

use crate::types::{EncinaError, PageId, Result};

use super::PageStorage;

/// A [`PageStorage`] that keeps every page in memory.
///
/// There is no durable layer below it, so the flush operations are no-ops.
pub struct MemoryPageStorage {
    page_size: usize,
    pages: Vec<Box<[u8]>>,
}

impl MemoryPageStorage {
    /// Create an empty store handing out pages of `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            pages: Vec::new(),
        }
    }

    /// Number of pages created so far.
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    fn slot(&self, id: PageId) -> Result<usize> {
        let idx = id.0 as usize;
        if idx >= self.pages.len() {
            return Err(EncinaError::Invalid("page id was never created"));
        }
        Ok(idx)
    }
}

impl PageStorage for MemoryPageStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn create_page(&mut self) -> Result<PageId> {
        let id = u32::try_from(self.pages.len())
            .map_err(|_| EncinaError::Invalid("page id space exhausted"))?;
        self.pages.push(vec![0u8; self.page_size].into_boxed_slice());
        Ok(PageId(id))
    }

    fn read_page(&mut self, id: PageId, buf: &mut [u8]) -> Result<()> {
        let idx = self.slot(id)?;
        if buf.len() != self.page_size {
            return Err(EncinaError::Invalid("buffer length != page size"));
        }
        buf.copy_from_slice(&self.pages[idx]);
        Ok(())
    }

    fn write_page(&mut self, id: PageId, buf: &[u8]) -> Result<()> {
        let idx = self.slot(id)?;
        if buf.len() != self.page_size {
            return Err(EncinaError::Invalid("buffer length != page size"));
        }
        self.pages[idx].copy_from_slice(buf);
        Ok(())
    }

    fn flush_page(&mut self, _id: PageId) -> Result<()> {
        Ok(())
    }

    fn flush_all(&mut self) -> Result<()> {
        Ok(())
    }
}
