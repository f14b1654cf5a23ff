//! B+ tree engine: the unified walk.
//!
//! One private routine implements every public operation by parameterizing
//! over an [`Op`] tag, so the page-stepping and proactive-splitting logic
//! exists exactly once. A node is split the moment a mutating walk finds it
//! full, before anything else happens at that level; the walk then restarts
//! from the (possibly new) root. Splitting ahead of need means the parent
//! of a splitting node always has a free slot, which keeps every operation
//! a single pass from root to leaf.
//!
//! Inserting a key larger than every existing key is the dominant workload
//! this engine was built for, so the tree remembers the leaf that received
//! the most recent largest key. When a new key sorts at or after that leaf's
//! contents and the leaf still has room, the walk jumps straight to it and
//! skips every interior comparison.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::trace;

use crate::pager::PageStorage;
use crate::types::{EncinaError, PageId, Result};

use super::codec::{KeyCodec, SummaryCodec, ValCodec};
use super::interior::InteriorCursor;
use super::leaf::LeafCursor;
use super::node::{self, NodeCursor, NodeKind};
use super::stats::{WalkStats, WalkStatsSnapshot};

/// Tuning knobs for a [`BTree`].
#[derive(Clone, Debug)]
pub struct BTreeOptions {
    /// Jump straight to the largest-key leaf for appending inserts.
    pub fast_path: bool,
    /// Split right-edge nodes unevenly, keeping all but one bucket on the
    /// left, so append workloads produce densely packed pages.
    pub uneven_splits: bool,
}

impl Default for BTreeOptions {
    fn default() -> Self {
        Self {
            fast_path: true,
            uneven_splits: true,
        }
    }
}

/// Operation tag threaded through the unified walk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Op {
    GetValFromKey,
    GetValFromKeyFloor,
    GetValFromOrd,
    GetKeyFromOrd,
    Insert,
    Replace,
}

impl Op {
    fn is_from_ord(self) -> bool {
        matches!(self, Op::GetValFromOrd | Op::GetKeyFromOrd)
    }

    fn is_mutation(self) -> bool {
        matches!(self, Op::Insert | Op::Replace)
    }
}

/// What a walk produced at the leaf.
enum Walked<K, V> {
    Miss,
    Key(K),
    Val(V),
    Inserted,
}

/// A paged B+ tree of fixed-width keys and values.
///
/// The tree exclusively owns its page storage, its codec parameters and a
/// small set of reusable traversal cursors; every operation takes
/// `&mut self`, so a tree supports one in-flight operation at a time.
///
/// `S` is the reserved per-child summary type on interior pages; no
/// aggregation logic runs today, and `()` reserves no space.
pub struct BTree<K, V, S = ()> {
    storage: Box<dyn PageStorage>,
    options: BTreeOptions,
    root: PageId,
    size: u64,
    /// Encoded largest key ever inserted, valid when `largest_key_page` is
    /// set. Its leaf is always the rightmost leaf of the tree.
    largest_key: Box<[u8]>,
    largest_key_page: Option<PageId>,
    leaf: LeafCursor<K, V>,
    interior: InteriorCursor<K, S>,
    parent: InteriorCursor<K, S>,
    scratch: Box<[u8]>,
    /// Per-child count increments applied on the way down by the current
    /// insert walk, so they can be rolled back on a split restart or a
    /// duplicate-key failure.
    pending_incs: Vec<(PageId, usize)>,
    stats: Arc<WalkStats>,
}

impl<K: KeyCodec, V: ValCodec, S: SummaryCodec> BTree<K, V, S> {
    /// Create a new tree on `storage` with default options.
    ///
    /// Allocates the root page, an empty leaf that is its own parent.
    pub fn create(storage: Box<dyn PageStorage>) -> Result<Self> {
        Self::with_options(storage, BTreeOptions::default())
    }

    /// Create a new tree on `storage` with the given options.
    pub fn with_options(mut storage: Box<dyn PageStorage>, options: BTreeOptions) -> Result<Self> {
        let page_size = storage.page_size();
        if LeafCursor::<K, V>::capacity_for(page_size) < 2
            || InteriorCursor::<K, S>::capacity_for(page_size) < 3
        {
            return Err(EncinaError::Invalid(
                "page size too small for the tree geometry",
            ));
        }
        let mut leaf = LeafCursor::new(page_size);
        let root = storage.create_page()?;
        leaf.init_empty(root, root);
        leaf.write_back(storage.as_mut())?;
        Ok(Self {
            storage,
            options,
            root,
            size: 0,
            largest_key: vec![0u8; K::ENCODED_LEN].into_boxed_slice(),
            largest_key_page: None,
            leaf,
            interior: InteriorCursor::new(page_size),
            parent: InteriorCursor::new(page_size),
            scratch: vec![0u8; page_size].into_boxed_slice(),
            pending_incs: Vec::new(),
            stats: Arc::new(WalkStats::default()),
        })
    }

    /// Number of entries in the tree.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of entries with a key between `min` and `max` inclusive;
    /// `None` stands for the respective infinity. Only the fully unbounded
    /// form is implemented.
    pub fn get_num_from_keys(&self, min: Option<&K>, max: Option<&K>) -> Result<u64> {
        if min.is_none() && max.is_none() {
            return Ok(self.size);
        }
        Err(EncinaError::Unsupported("bounded key-range counts"))
    }

    /// Page id of the current root.
    pub fn root_page(&self) -> PageId {
        self.root
    }

    /// Value stored under `key`, or `None` if the key is absent.
    pub fn get_val_from_key(&mut self, key: &K) -> Result<Option<V>> {
        let mut key_buf = vec![0u8; K::ENCODED_LEN];
        K::encode_key(key, &mut key_buf);
        match self.walk(Some(&key_buf), None, Op::GetValFromKey, 0)? {
            Walked::Val(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Value stored under the largest key ≤ `key`, or `None` if every key
    /// sorts after it.
    pub fn get_val_from_key_floor(&mut self, key: &K) -> Result<Option<V>> {
        let mut key_buf = vec![0u8; K::ENCODED_LEN];
        K::encode_key(key, &mut key_buf);
        match self.walk(Some(&key_buf), None, Op::GetValFromKeyFloor, 0)? {
            Walked::Val(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Value of the `ord`-th entry in ascending key order, or `None` past
    /// the end.
    pub fn get_val_from_ord(&mut self, ord: u64) -> Result<Option<V>> {
        match self.walk(None, None, Op::GetValFromOrd, ord)? {
            Walked::Val(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Key of the `ord`-th entry in ascending key order, or `None` past the
    /// end.
    pub fn get_key_from_ord(&mut self, ord: u64) -> Result<Option<K>> {
        match self.walk(None, None, Op::GetKeyFromOrd, ord)? {
            Walked::Key(key) => Ok(Some(key)),
            _ => Ok(None),
        }
    }

    /// Insert a new entry. Fails with
    /// [`EncinaError::DuplicateKey`] if the key is already present, leaving
    /// the tree unchanged.
    pub fn insert(&mut self, key: &K, val: &V) -> Result<()> {
        let mut key_buf = vec![0u8; K::ENCODED_LEN];
        K::encode_key(key, &mut key_buf);
        let mut val_buf = vec![0u8; V::ENCODED_LEN];
        V::encode_val(val, &mut val_buf);
        self.walk(Some(&key_buf), Some(&val_buf), Op::Insert, 0)?;
        self.size += 1;
        Ok(())
    }

    /// Overwrite the value of an existing entry and return the previous
    /// value. Fails with [`EncinaError::MissingKey`] if the key is absent.
    pub fn replace(&mut self, key: &K, val: &V) -> Result<V> {
        let mut key_buf = vec![0u8; K::ENCODED_LEN];
        K::encode_key(key, &mut key_buf);
        let mut val_buf = vec![0u8; V::ENCODED_LEN];
        V::encode_val(val, &mut val_buf);
        match self.walk(Some(&key_buf), Some(&val_buf), Op::Replace, 0)? {
            Walked::Val(previous) => Ok(previous),
            _ => Err(EncinaError::Corruption("replace yielded no previous value")),
        }
    }

    /// Remove an entry. Not implemented.
    pub fn remove(&mut self, _key: &K) -> Result<V> {
        Err(EncinaError::Unsupported("remove"))
    }

    /// Remove all entries. Not implemented.
    pub fn clear(&mut self) -> Result<()> {
        Err(EncinaError::Unsupported("clear"))
    }

    /// Value stored under the smallest key ≥ `key`. Not implemented.
    pub fn get_val_from_key_ceiling(&mut self, _key: &K) -> Result<Option<V>> {
        Err(EncinaError::Unsupported("ceiling lookup"))
    }

    /// Ordinal of `key`. Not implemented.
    pub fn get_ord_from_key(&mut self, _key: &K) -> Result<u64> {
        Err(EncinaError::Unsupported("ordinal of key"))
    }

    /// Ordinal of the largest key ≤ `key`. Not implemented.
    pub fn get_ord_from_key_floor(&mut self, _key: &K) -> Result<u64> {
        Err(EncinaError::Unsupported("ordinal floor of key"))
    }

    /// Ordinal of the smallest key ≥ `key`. Not implemented.
    pub fn get_ord_from_key_ceiling(&mut self, _key: &K) -> Result<u64> {
        Err(EncinaError::Unsupported("ordinal ceiling of key"))
    }

    /// Smallest key strictly greater than `key`. Not implemented.
    pub fn get_key_from_key_next(&mut self, _key: &K) -> Result<Option<K>> {
        Err(EncinaError::Unsupported("successor lookup"))
    }

    /// Largest key strictly less than `key`. Not implemented.
    pub fn get_key_from_key_prev(&mut self, _key: &K) -> Result<Option<K>> {
        Err(EncinaError::Unsupported("predecessor lookup"))
    }

    /// Flush the underlying storage.
    pub fn flush(&mut self) -> Result<()> {
        self.storage.flush_all()
    }

    /// Live statistics counters for this tree.
    pub fn stats(&self) -> Arc<WalkStats> {
        Arc::clone(&self.stats)
    }

    /// Snapshot the current statistics counters.
    pub fn stats_snapshot(&self) -> WalkStatsSnapshot {
        self.stats.snapshot()
    }

    /// Emit the current statistics to the tracing sink.
    pub fn emit_stats(&self) {
        self.stats.emit_tracing();
    }

    /// The unified traversal. `key`/`val` carry the encoded operands of
    /// key-based operations; `ord` carries the rank operand of ordinal
    /// operations.
    fn walk(
        &mut self,
        key: Option<&[u8]>,
        val: Option<&[u8]>,
        op: Op,
        mut ord: u64,
    ) -> Result<Walked<K, V>> {
        let Self {
            storage,
            options,
            root,
            size,
            largest_key,
            largest_key_page,
            leaf,
            interior,
            parent,
            scratch,
            pending_incs,
            stats,
        } = self;
        let storage = storage.as_mut();
        let mut cur_int = interior;
        let mut par_int = parent;
        pending_incs.clear();

        let mut page_id = *root;
        // Index of the current page within the parent cursor's children,
        // carried over from the previous interior step.
        let mut idx: isize = -1;
        let mut right_edge = true;
        let mut cheat = false;
        let mut cur_is_leaf = false;
        let mut bound = false;

        if op == Op::Insert && options.fast_path {
            if let (Some(target), Some(key)) = (*largest_key_page, key) {
                leaf.load(storage, target)?;
                if K::compare_encoded(key, largest_key) == Ordering::Greater && !leaf.is_full() {
                    page_id = target;
                    cheat = true;
                    cur_is_leaf = true;
                    bound = true;
                }
            }
        }

        loop {
            if !bound {
                storage.read_page(page_id, scratch)?;
                match node::kind(scratch)? {
                    NodeKind::Leaf => {
                        leaf.adopt(page_id, scratch);
                        cur_is_leaf = true;
                    }
                    NodeKind::Interior => {
                        cur_int.adopt(page_id, scratch);
                        cur_is_leaf = false;
                    }
                }
            }
            bound = false;

            let cur_full = if cur_is_leaf {
                leaf.is_full()
            } else {
                cur_int.is_full()
            };
            if op.is_mutation() && cur_full {
                let splitting_last_or_root;
                let mut old: i64;
                if page_id == *root {
                    let new_root = par_int.init_root(storage)?;
                    par_int.set_child_page_id(0, page_id)?;
                    // The old root stops being its own parent; the split
                    // below carries the new parent into the right sibling.
                    if cur_is_leaf {
                        leaf.set_parent_id(new_root);
                    } else {
                        cur_int.set_parent_id(new_root);
                    }
                    trace!(
                        target: "encina::walk",
                        old_root = %page_id,
                        new_root = %new_root,
                        "growing a new root"
                    );
                    *root = new_root;
                    idx = 0;
                    old = *size as i64;
                    splitting_last_or_root = true;
                } else {
                    debug_assert!(!par_int.is_full());
                    splitting_last_or_root = idx as usize >= par_int.num_buckets() - 1;
                    old = if splitting_last_or_root {
                        // The last child's count is not maintained; the
                        // sentinel leaves it to normal insertion
                        // bookkeeping.
                        -1
                    } else {
                        par_int.num_vals_below_child(idx as usize)? as i64
                    };
                }
                if op == Op::Insert && old != -1 {
                    // The in-flight key was already counted at the parent
                    // on the way down.
                    old -= 1;
                }

                let (num_buckets, max_buckets) = if cur_is_leaf {
                    (leaf.num_buckets(), leaf.max_buckets())
                } else {
                    (cur_int.num_buckets(), cur_int.max_buckets())
                };
                let uneven = options.uneven_splits && right_edge;
                let split_point = if uneven {
                    num_buckets - 1
                } else {
                    max_buckets / 2
                };
                if uneven {
                    stats.inc_splits_uneven();
                } else {
                    stats.inc_splits_even();
                }

                // Leaf values that stay below the left half.
                let num: u64 = {
                    let cur: &dyn NodeCursor = if cur_is_leaf { &*leaf } else { &*cur_int };
                    (0..split_point).map(|i| cur.num_vals_below_bucket(i)).sum()
                };

                par_int.insert_child_at(idx as usize + 1)?;
                let old_page = page_id;
                let new_page = {
                    let sep = par_int.key_slot_mut(idx as usize + 1)?;
                    let cur: &mut dyn NodeCursor = if cur_is_leaf {
                        &mut *leaf
                    } else {
                        &mut *cur_int
                    };
                    cur.split(storage, split_point, sep)?
                };
                par_int.set_num_vals_below_child(idx as usize, num)?;
                if *largest_key_page == Some(old_page) {
                    *largest_key_page = Some(new_page);
                }
                par_int.set_child_page_id(idx as usize + 1, new_page)?;
                if !splitting_last_or_root {
                    let below_right = old - num as i64;
                    if below_right < 0 {
                        return Err(EncinaError::Corruption("child count underflow in split"));
                    }
                    par_int.set_num_vals_below_child(idx as usize + 1, below_right as u64)?;
                }
                par_int.write_back(storage)?;
                trace!(
                    target: "encina::walk",
                    page = %old_page,
                    sibling = %new_page,
                    "split full node"
                );

                // The restart revisits every ancestor and counts the
                // in-flight key again, so the counts recorded on the way
                // down must be rolled back first. The immediate parent's
                // own increment was consumed by the `old -= 1` above.
                if op == Op::Insert {
                    let keep = usize::from(!splitting_last_or_root);
                    let undo = pending_incs.len().saturating_sub(keep);
                    undo_count_increments(cur_int, storage, &pending_incs[..undo])?;
                    pending_incs.clear();
                }

                page_id = *root;
                idx = -1;
                cheat = false;
                continue;
            }

            if cur_is_leaf {
                let num_buckets = leaf.num_buckets();
                let (leaf_idx, comp) = if cheat {
                    (num_buckets as isize - 1, Ordering::Greater)
                } else if !op.is_from_ord() {
                    let key = key.expect("key-based op carries a key");
                    let found = leaf.search(key);
                    (found, leaf.compare(key, found))
                } else {
                    (-1, Ordering::Less)
                };
                match op {
                    Op::GetValFromOrd => {
                        return Ok(if ord >= num_buckets as u64 {
                            Walked::Miss
                        } else {
                            Walked::Val(leaf.val_at(ord as usize)?)
                        });
                    }
                    Op::GetKeyFromOrd => {
                        return Ok(if ord >= num_buckets as u64 {
                            Walked::Miss
                        } else {
                            Walked::Key(leaf.key_at(ord as usize)?)
                        });
                    }
                    Op::GetValFromKey => {
                        return Ok(if comp == Ordering::Equal {
                            Walked::Val(leaf.val_at(leaf_idx as usize)?)
                        } else {
                            Walked::Miss
                        });
                    }
                    Op::GetValFromKeyFloor => {
                        return Ok(if leaf_idx < 0 {
                            Walked::Miss
                        } else {
                            Walked::Val(leaf.val_at(leaf_idx as usize)?)
                        });
                    }
                    Op::Insert => {
                        if comp == Ordering::Equal {
                            // Roll the descent's count increments back so a
                            // rejected insert leaves the tree untouched.
                            undo_count_increments(cur_int, storage, pending_incs)?;
                            pending_incs.clear();
                            return Err(EncinaError::DuplicateKey);
                        }
                        if cheat {
                            stats.inc_fast_path_hits();
                        } else {
                            stats.inc_fast_path_misses();
                        }
                        let key = key.expect("insert carries a key");
                        let val = val.expect("insert carries a value");
                        if largest_key_page.is_none()
                            || cheat
                            || K::compare_encoded(key, largest_key) != Ordering::Less
                        {
                            largest_key.copy_from_slice(key);
                            *largest_key_page = Some(leaf.page_id());
                        }
                        leaf.insert_entry(storage, (leaf_idx + 1) as usize, key, val)?;
                        pending_incs.clear();
                        return Ok(Walked::Inserted);
                    }
                    Op::Replace => {
                        if comp != Ordering::Equal {
                            return Err(EncinaError::MissingKey);
                        }
                        let val = val.expect("replace carries a value");
                        let previous = leaf.set_val(storage, leaf_idx as usize, val)?;
                        return Ok(Walked::Val(previous));
                    }
                }
            }

            let num_children = cur_int.num_buckets();
            if num_children == 0 {
                return Err(EncinaError::Corruption("interior node without children"));
            }
            let child_idx = if !op.is_from_ord() {
                let key = key.expect("key-based op carries a key");
                cur_int.search(key)
            } else {
                // Route by rank: subtract whole subtrees until the ordinal
                // falls inside one. The last child is the catch-all, so its
                // (unmaintained) count is never consulted.
                let mut i = 0usize;
                while i + 1 < num_children {
                    let below = cur_int.num_vals_below_child(i)?;
                    if ord < below {
                        break;
                    }
                    ord -= below;
                    i += 1;
                }
                i
            };
            if op == Op::Insert && child_idx + 1 < num_children {
                // Count the new key before it lands; a second top-down pass
                // after the insert is never needed.
                let below = cur_int.num_vals_below_child(child_idx)?;
                cur_int.set_num_vals_below_child(child_idx, below + 1)?;
                cur_int.write_back(storage)?;
                pending_incs.push((page_id, child_idx));
            }
            right_edge &= child_idx + 1 == num_children;
            page_id = cur_int.child_page_id(child_idx)?;
            idx = child_idx as isize;
            std::mem::swap(&mut cur_int, &mut par_int);
            trace!(target: "encina::walk", page = %page_id, "descending into child");
        }
    }
}

/// Decrement the recorded per-child counts for each `(page, child)` pair.
fn undo_count_increments<K: KeyCodec, S: SummaryCodec>(
    cursor: &mut InteriorCursor<K, S>,
    storage: &mut dyn PageStorage,
    incs: &[(PageId, usize)],
) -> Result<()> {
    for &(page, child) in incs {
        cursor.load(storage, page)?;
        let below = cursor.num_vals_below_child(child)?;
        if below == 0 {
            return Err(EncinaError::Corruption("child count underflow on rollback"));
        }
        cursor.set_num_vals_below_child(child, below - 1)?;
        cursor.write_back(storage)?;
    }
    Ok(())
}
