//! Flat-file page storage.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::types::{EncinaError, PageId, Result};

use super::PageStorage;

/// A [`PageStorage`] backed by a single file.
///
/// Page `i` occupies bytes `i * page_size .. (i + 1) * page_size`.
/// `create_page` zero-extends the file, so a created-but-never-written page
/// reads back as zeroes. Flushes map to `File::sync_all`.
pub struct FilePageStorage {
    file: File,
    page_size: usize,
    num_pages: u32,
}

impl FilePageStorage {
    /// Create a new, empty store at `path`, truncating any existing file.
    pub fn create(path: &Path, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            page_size,
            num_pages: 0,
        })
    }

    /// Open an existing store at `path`.
    ///
    /// The file length must be a whole number of pages.
    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len % page_size as u64 != 0 {
            return Err(EncinaError::Corruption("file length not page-aligned"));
        }
        let num_pages = u32::try_from(len / page_size as u64)
            .map_err(|_| EncinaError::Corruption("file holds more pages than the id space"))?;
        Ok(Self {
            file,
            page_size,
            num_pages,
        })
    }

    /// Number of pages created so far.
    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    fn check(&self, id: PageId, buf_len: usize) -> Result<u64> {
        if id.0 >= self.num_pages {
            return Err(EncinaError::Invalid("page id was never created"));
        }
        if buf_len != self.page_size {
            return Err(EncinaError::Invalid("buffer length != page size"));
        }
        Ok(id.0 as u64 * self.page_size as u64)
    }
}

impl PageStorage for FilePageStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn create_page(&mut self) -> Result<PageId> {
        let id = self.num_pages;
        self.num_pages = self
            .num_pages
            .checked_add(1)
            .ok_or(EncinaError::Invalid("page id space exhausted"))?;
        self.file
            .set_len(self.num_pages as u64 * self.page_size as u64)?;
        Ok(PageId(id))
    }

    fn read_page(&mut self, id: PageId, buf: &mut [u8]) -> Result<()> {
        let offset = self.check(id, buf.len())?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&mut self, id: PageId, buf: &[u8]) -> Result<()> {
        let offset = self.check(id, buf.len())?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn flush_page(&mut self, _id: PageId) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn flush_all(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
