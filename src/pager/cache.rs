//! LRU write-back cache over a delegate page store.

use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::{debug, trace};

use crate::types::{EncinaError, PageId, Result};

use super::PageStorage;

struct CacheSlot {
    buf: Box<[u8]>,
    dirty: bool,
}

/// A bounded, LRU-ordered cache of page buffers over a delegate
/// [`PageStorage`].
///
/// Reads are served from the cache when possible; writes always land in the
/// cache and are marked dirty. Dirty pages reach the delegate only when
/// their slot is evicted to make room, so the cache must outlive any data
/// it has absorbed. `flush_page`/`flush_all` are forwarded to the delegate
/// and do not drain dirty cache entries; callers that need dirty state on
/// the durable medium must write those pages through first.
pub struct CachingPageStorage {
    delegate: Box<dyn PageStorage>,
    cache: LruCache<PageId, CacheSlot>,
    page_size: usize,
}

impl CachingPageStorage {
    /// Wrap `delegate` with a cache of `capacity` pages.
    pub fn new(delegate: Box<dyn PageStorage>, capacity: usize) -> Result<Self> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or(EncinaError::Invalid("cache capacity must be > 0"))?;
        let page_size = delegate.page_size();
        Ok(Self {
            delegate,
            cache: LruCache::new(capacity),
            page_size,
        })
    }

    /// Current cache capacity in pages.
    pub fn cache_size(&self) -> usize {
        self.cache.cap().get()
    }

    /// Number of pages currently cached.
    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    /// Rebuild the cache with a new capacity.
    ///
    /// Entries are carried over in recency order until the new capacity is
    /// reached; dirty entries that no longer fit are written back to the
    /// delegate before being dropped.
    pub fn set_cache_size(&mut self, capacity: usize) -> Result<()> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or(EncinaError::Invalid("cache capacity must be > 0"))?;
        debug!(
            target: "encina::cache",
            old = self.cache.cap().get(),
            new = capacity.get(),
            "rebuilding page cache"
        );
        let mut entries = Vec::with_capacity(self.cache.len());
        while let Some(entry) = self.cache.pop_lru() {
            entries.push(entry);
        }
        self.cache = LruCache::new(capacity);
        // Oldest first, so the most recently used pages end up most recent
        // in the rebuilt cache and survive any capacity overflow.
        for (id, slot) in entries {
            self.insert_slot(id, slot)?;
        }
        Ok(())
    }

    fn insert_slot(&mut self, id: PageId, slot: CacheSlot) -> Result<()> {
        if let Some((evicted_id, evicted)) = self.cache.push(id, slot) {
            if evicted_id != id && evicted.dirty {
                trace!(
                    target: "encina::cache",
                    page = %evicted_id,
                    "writing back dirty page on eviction"
                );
                self.delegate.write_page(evicted_id, &evicted.buf)?;
            }
        }
        Ok(())
    }
}

impl PageStorage for CachingPageStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn create_page(&mut self) -> Result<PageId> {
        self.delegate.create_page()
    }

    fn read_page(&mut self, id: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != self.page_size {
            return Err(EncinaError::Invalid("buffer length != page size"));
        }
        if let Some(slot) = self.cache.get(&id) {
            buf.copy_from_slice(&slot.buf);
            return Ok(());
        }
        let mut fresh = vec![0u8; self.page_size].into_boxed_slice();
        self.delegate.read_page(id, &mut fresh)?;
        buf.copy_from_slice(&fresh);
        self.insert_slot(
            id,
            CacheSlot {
                buf: fresh,
                dirty: false,
            },
        )
    }

    fn write_page(&mut self, id: PageId, buf: &[u8]) -> Result<()> {
        if buf.len() != self.page_size {
            return Err(EncinaError::Invalid("buffer length != page size"));
        }
        if let Some(slot) = self.cache.get_mut(&id) {
            slot.buf.copy_from_slice(buf);
            slot.dirty = true;
            return Ok(());
        }
        self.insert_slot(
            id,
            CacheSlot {
                buf: buf.to_vec().into_boxed_slice(),
                dirty: true,
            },
        )
    }

    fn flush_page(&mut self, id: PageId) -> Result<()> {
        self.delegate.flush_page(id)
    }

    fn flush_all(&mut self) -> Result<()> {
        self.delegate.flush_all()
    }
}
