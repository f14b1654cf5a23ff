//! End-to-end walk behavior: lookups, ordered inserts, replacement and the
//! operation preconditions.

use encina::pager::MemoryPageStorage;
use encina::tree::{BTree, BTreeOptions};
use encina::types::{EncinaError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

// Four (u32, u32) entries per leaf, three children per interior node.
const PAGE_SIZE: usize = 52;

fn small_tree() -> Result<BTree<u32, u32>> {
    BTree::create(Box::new(MemoryPageStorage::new(PAGE_SIZE)))
}

#[test]
fn point_floor_and_miss_lookups() -> Result<()> {
    let mut tree = small_tree()?;
    for key in [5u32, 1, 3, 8, 2, 9, 4] {
        tree.insert(&key, &(key * 100))?;
    }

    assert_eq!(tree.get_val_from_key(&3)?, Some(300), "exact lookup");
    assert_eq!(
        tree.get_val_from_key_floor(&6)?,
        Some(500),
        "floor of 6 is the entry for key 5"
    );
    assert_eq!(tree.get_val_from_key(&7)?, None, "key 7 was never inserted");
    assert_eq!(
        tree.get_val_from_key_floor(&0)?,
        None,
        "floor left of every key"
    );
    assert_eq!(tree.get_val_from_key_floor(&9)?, Some(900), "exact floor");
    assert_eq!(tree.get_val_from_key_floor(&99)?, Some(900), "floor past the end");
    Ok(())
}

#[test]
fn round_trip_and_order_invariant() -> Result<()> {
    let mut tree = small_tree()?;
    let mut keys: Vec<u32> = (0..200).map(|i| i * 3 + 1).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    keys.shuffle(&mut rng);
    for key in &keys {
        tree.insert(key, &(key + 7))?;
    }

    for key in &keys {
        assert_eq!(tree.get_val_from_key(key)?, Some(key + 7));
    }

    // An in-order scan over the ordinal surface yields strictly ascending
    // keys with no duplicates.
    keys.sort_unstable();
    for (ord, expected) in keys.iter().enumerate() {
        assert_eq!(
            tree.get_key_from_ord(ord as u64)?,
            Some(*expected),
            "key at ordinal {ord}"
        );
        assert_eq!(
            tree.get_val_from_ord(ord as u64)?,
            Some(expected + 7),
            "value at ordinal {ord}"
        );
    }
    assert_eq!(tree.get_key_from_ord(keys.len() as u64)?, None);
    Ok(())
}

#[test]
fn replace_returns_each_previous_value() -> Result<()> {
    let mut tree = small_tree()?;
    tree.insert(&42, &1)?;
    assert_eq!(tree.replace(&42, &2)?, 1);
    assert_eq!(tree.replace(&42, &3)?, 2);
    assert_eq!(tree.get_val_from_key(&42)?, Some(3));
    assert_eq!(tree.size(), 1, "replace never changes the size");
    Ok(())
}

#[test]
fn insert_on_existing_key_fails_and_changes_nothing() -> Result<()> {
    let mut tree = small_tree()?;
    for key in 0..20u32 {
        tree.insert(&key, &key)?;
    }
    let before = tree.size();

    // Both an interior key and the current largest key (which the insert
    // fast path targets) must be rejected.
    for dup in [7u32, 19] {
        let err = tree.insert(&dup, &999).unwrap_err();
        assert!(matches!(err, EncinaError::DuplicateKey), "{dup}: {err}");
    }
    assert_eq!(tree.size(), before);
    for key in 0..20u32 {
        assert_eq!(tree.get_val_from_key(&key)?, Some(key));
    }
    for (ord, key) in (0..20u32).enumerate() {
        assert_eq!(tree.get_key_from_ord(ord as u64)?, Some(key));
    }
    Ok(())
}

#[test]
fn replace_on_missing_key_fails_and_changes_nothing() -> Result<()> {
    let mut tree = small_tree()?;
    tree.insert(&1, &10)?;
    let err = tree.replace(&2, &20).unwrap_err();
    assert!(matches!(err, EncinaError::MissingKey));
    assert_eq!(tree.size(), 1);
    assert_eq!(tree.get_val_from_key(&1)?, Some(10));
    assert_eq!(tree.get_val_from_key(&2)?, None);
    Ok(())
}

#[test]
fn size_counts_only_successful_inserts() -> Result<()> {
    let mut tree = small_tree()?;
    for key in 0..50u32 {
        tree.insert(&key, &key)?;
    }
    assert_eq!(tree.size(), 50);

    assert!(tree.insert(&25, &0).is_err());
    assert!(tree.replace(&999, &0).is_err());
    tree.replace(&25, &1)?;
    assert_eq!(tree.size(), 50);
    Ok(())
}

#[test]
fn sequential_and_random_insertion_agree() -> Result<()> {
    let mut sequential = small_tree()?;
    for key in 1..=1000u32 {
        sequential.insert(&key, &(key ^ 0xA5A5))?;
    }

    let mut shuffled: Vec<u32> = (1..=1000).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(4242);
    shuffled.shuffle(&mut rng);
    let mut random = small_tree()?;
    for key in &shuffled {
        random.insert(key, &(key ^ 0xA5A5))?;
    }

    assert_eq!(sequential.size(), random.size());
    for key in 1..=1000u32 {
        let expected = Some(key ^ 0xA5A5);
        assert_eq!(sequential.get_val_from_key(&key)?, expected);
        assert_eq!(random.get_val_from_key(&key)?, expected);
    }
    assert_eq!(sequential.get_val_from_key(&0)?, None);
    assert_eq!(sequential.get_val_from_key(&1001)?, None);

    let stats = sequential.stats_snapshot();
    assert!(
        stats.fast_path_hits > stats.fast_path_misses,
        "ascending inserts should ride the fast path: {stats:?}"
    );
    Ok(())
}

#[test]
fn disabling_the_fast_path_changes_nothing_observable() -> Result<()> {
    let options = BTreeOptions {
        fast_path: false,
        uneven_splits: false,
    };
    let mut plain: BTree<u32, u32> =
        BTree::with_options(Box::new(MemoryPageStorage::new(PAGE_SIZE)), options)?;
    let mut tuned = small_tree()?;

    for key in 1..=300u32 {
        plain.insert(&key, &key)?;
        tuned.insert(&key, &key)?;
    }
    assert_eq!(plain.stats_snapshot().fast_path_hits, 0);
    for key in 1..=300u32 {
        assert_eq!(plain.get_val_from_key(&key)?, tuned.get_val_from_key(&key)?);
    }
    for ord in 0..300u64 {
        assert_eq!(plain.get_key_from_ord(ord)?, tuned.get_key_from_ord(ord)?);
    }
    Ok(())
}
