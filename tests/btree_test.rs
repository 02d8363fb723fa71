use std::sync::Arc;

use crio::buffer::BufferPoolManager;
use crio::common::CrioError;
use crio::index::BPlusTree;
use crio::storage::disk::DiskManager;

use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, disk_manager));
    (bpm, temp_file)
}

#[test]
fn test_btree_create_is_empty() {
    let (bpm, _temp) = create_bpm(10);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    assert_eq!(tree.get(&0).unwrap(), None);
    assert!(matches!(tree.delete(&0), Err(CrioError::EmptyStore)));
}

#[test]
fn test_btree_insert_and_search() {
    let (bpm, _temp) = create_bpm(10);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    tree.put(10, 100).unwrap();
    tree.put(20, 200).unwrap();
    tree.put(30, 300).unwrap();

    assert_eq!(tree.get(&10).unwrap(), Some(100));
    assert_eq!(tree.get(&20).unwrap(), Some(200));
    assert_eq!(tree.get(&30).unwrap(), Some(300));
    assert_eq!(tree.get(&40).unwrap(), None);
}

#[test]
fn test_btree_insert_many() {
    let (bpm, _temp) = create_bpm(50);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    for i in 0..1000 {
        tree.put(i, i * 2).unwrap();
    }

    for i in 0..1000 {
        assert_eq!(tree.get(&i).unwrap(), Some(i * 2), "failed to find key {i}");
    }
}

#[test]
fn test_btree_insert_reverse() {
    let (bpm, _temp) = create_bpm(50);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    for i in (0..100).rev() {
        tree.put(i, i).unwrap();
    }

    for i in 0..100 {
        assert_eq!(tree.get(&i).unwrap(), Some(i));
    }
}

/// Alphabetical put/get, verified via a full in-order scan.
#[test]
fn test_btree_alphabetical_iteration() {
    let (bpm, _temp) = create_bpm(10);
    let tree = BPlusTree::<crio::index::FixedBytes<8>, u32>::new(bpm).unwrap();

    let words = ["banana", "apple", "cherry", "date", "fig", "elderberry"];
    for (i, word) in words.iter().enumerate() {
        let mut bytes = [0u8; 8];
        bytes[..word.len()].copy_from_slice(word.as_bytes());
        tree.put(crio::index::FixedBytes::new(bytes), i as u32).unwrap();
    }

    let mut sorted_words = words.to_vec();
    sorted_words.sort();

    let collected: Vec<_> = tree.iterator().unwrap().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(collected.len(), words.len());

    for (entry, expected_word) in collected.iter().zip(sorted_words.iter()) {
        let mut expected_bytes = [0u8; 8];
        expected_bytes[..expected_word.len()].copy_from_slice(expected_word.as_bytes());
        assert_eq!(entry.0, crio::index::FixedBytes::new(expected_bytes));
    }
}

/// Inserting 101 keys in descending order with a small leaf capacity forces
/// repeated leaf/internal splits, rebuilding the root multiple times.
#[test]
fn test_btree_descending_insert_forces_overflow_splits() {
    let (bpm, _temp) = create_bpm(50);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    for i in (0..=100).rev() {
        tree.put(i, i).unwrap();
    }

    for i in 0..=100 {
        assert_eq!(tree.get(&i).unwrap(), Some(i), "failed after split at key {i}");
    }

    let collected: Vec<_> = tree
        .iterator()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    let expected: Vec<u32> = (0..=100).collect();
    assert_eq!(collected, expected);
}

#[test]
fn test_btree_range_scan() {
    let (bpm, _temp) = create_bpm(50);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    for i in 0..100 {
        tree.put(i * 10, i).unwrap();
    }

    let results = tree.get_range(&200, &500).unwrap();
    assert_eq!(results.len(), 31); // keys 200, 210, ..., 500
    for (i, value) in results.iter().enumerate() {
        assert_eq!(*value, 20 + i as u32);
    }
}

#[test]
fn test_btree_range_scan_30_to_70() {
    let (bpm, _temp) = create_bpm(50);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    for i in 0..100 {
        tree.put(i, i).unwrap();
    }

    let results = tree.get_range(&30, &70).unwrap();
    let expected: Vec<u32> = (30..=70).collect();
    assert_eq!(results, expected);
}

#[test]
fn test_btree_range_scan_empty() {
    let (bpm, _temp) = create_bpm(10);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    for i in 0..10 {
        tree.put(i, i).unwrap();
    }

    let results = tree.get_range(&100, &200).unwrap();
    assert_eq!(results.len(), 0);
}

#[test]
fn test_btree_range_scan_all() {
    let (bpm, _temp) = create_bpm(50);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    for i in 0..100 {
        tree.put(i, i).unwrap();
    }

    let results = tree.get_range(&0, &99).unwrap();
    assert_eq!(results.len(), 100);
}

#[test]
fn test_btree_random_insert() {
    use rand::seq::SliceRandom;
    use rand::thread_rng;

    let (bpm, _temp) = create_bpm(100);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    let mut keys: Vec<u32> = (0..500).collect();
    keys.shuffle(&mut thread_rng());

    for &key in &keys {
        tree.put(key, key).unwrap();
    }

    for &key in &keys {
        assert_eq!(tree.get(&key).unwrap(), Some(key), "failed at key {key}");
    }
}

#[test]
fn test_btree_delete_basic() {
    let (bpm, _temp) = create_bpm(10);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    tree.put(1, 10).unwrap();
    tree.put(2, 20).unwrap();
    tree.put(3, 30).unwrap();

    assert!(tree.delete(&2).unwrap());
    assert_eq!(tree.get(&2).unwrap(), None);
    assert_eq!(tree.get(&1).unwrap(), Some(10));
    assert_eq!(tree.get(&3).unwrap(), Some(30));

    assert!(!tree.delete(&2).unwrap());
}

/// Inserts keys 200 down to 0, then deletes 0..99, forcing a cascade of
/// leaf and internal merges/borrows, and checks that exactly 100..=200
/// remains in order.
#[test]
fn test_btree_delete_with_cascading_merges() {
    let (bpm, _temp) = create_bpm(100);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    for i in (0..=200).rev() {
        tree.put(i, i).unwrap();
    }

    for i in 0..99 {
        assert!(tree.delete(&i).unwrap(), "delete {i} should have succeeded");
    }

    let remaining: Vec<u32> = tree
        .iterator()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();

    let expected: Vec<u32> = (99..=200).collect();
    assert_eq!(remaining, expected);

    for &i in &remaining {
        assert_eq!(tree.get(&i).unwrap(), Some(i));
    }
    for i in 0..99 {
        assert_eq!(tree.get(&i).unwrap(), None);
    }
}

#[test]
fn test_btree_delete_down_to_empty() {
    let (bpm, _temp) = create_bpm(50);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    for i in 0..50 {
        tree.put(i, i).unwrap();
    }
    for i in 0..50 {
        assert!(tree.delete(&i).unwrap());
    }

    assert_eq!(tree.get(&0).unwrap(), None);
    assert!(matches!(tree.delete(&0), Err(CrioError::EmptyStore)));
}

#[test]
fn test_btree_put_batch() {
    let (bpm, _temp) = create_bpm(10);
    let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

    tree.put_batch((0..30).map(|i| (i, i * 3))).unwrap();

    for i in 0..30 {
        assert_eq!(tree.get(&i).unwrap(), Some(i * 3));
    }
}

#[test]
fn test_btree_persistence() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(10, 2, disk_manager));
        let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

        for i in 0..50 {
            tree.put(i, i).unwrap();
        }

        tree.flush().unwrap();
    }

    {
        let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(10, 2, disk_manager));
        let tree = BPlusTree::<u32, u32>::new(bpm).unwrap();

        for i in 0..50 {
            assert_eq!(
                tree.get(&i).unwrap(),
                Some(i),
                "failed to find key {i} after reload"
            );
        }
    }
}

/// Concurrent readers must be able to walk the tree while no writer is
/// active, without observing a torn read.
#[test]
fn test_btree_concurrent_readers() {
    let (bpm, _temp) = create_bpm(50);
    let tree = Arc::new(BPlusTree::<u32, u32>::new(bpm).unwrap());

    for i in 0..200 {
        tree.put(i, i * 7).unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || {
                for i in 0..200 {
                    assert_eq!(tree.get(&i).unwrap(), Some(i * 7));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
