use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{
    CrioError, PageId, Result, DEFAULT_BUFFER_POOL_SIZE, DEFAULT_LRUK_K, HEADER_PAGE_ID,
    INVALID_PAGE_ID,
};
use crate::storage::disk::DiskManager;

use super::btree_iterator::BTreeIterator;
use super::btree_page::{internal_max_size, leaf_max_size, Node, NodeRef};
use super::codec::{BTreeKey, BTreeValue};

/// A persistent B+ tree keyed by `K`, storing opaque `V` values, built
/// entirely on top of a buffer pool. The tree's only private state is the
/// page id of its header page; the root pointer itself lives on disk (first
/// 8 bytes of the header page, little-endian), so multiple `BPlusTree`
/// handles over the same buffer pool always observe the same root.
pub struct BPlusTree<K: BTreeKey, V: BTreeValue> {
    bpm: Arc<BufferPoolManager>,
    header_page_id: PageId,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K: BTreeKey, V: BTreeValue> BPlusTree<K, V> {
    /// Opens (or creates) a database file at `path` with a default-sized
    /// buffer pool, and returns the tree rooted at its header page.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let disk_manager = Arc::new(DiskManager::new(path)?);
        let bpm = Arc::new(BufferPoolManager::new(
            DEFAULT_BUFFER_POOL_SIZE,
            DEFAULT_LRUK_K,
            disk_manager,
        ));
        Self::new(bpm)
    }

    /// Wraps an existing buffer pool, initializing the header page (page 0,
    /// root = `INVALID_PAGE_ID`) if the backing file was empty, or reusing
    /// whatever header page is already there.
    pub fn new(bpm: Arc<BufferPoolManager>) -> Result<Self> {
        let header_page_id = if bpm.disk_manager().num_pages() == 0 {
            let page_id = bpm.new_page()?;
            debug_assert_eq!(page_id, HEADER_PAGE_ID);
            let mut guard = bpm
                .checked_write_page(page_id)?
                .ok_or(CrioError::PageNotFound(page_id))?;
            guard.data_mut().fill(0);
            guard.data_mut()[0..8].copy_from_slice(&INVALID_PAGE_ID.as_i64().to_le_bytes());
            page_id
        } else {
            HEADER_PAGE_ID
        };

        Ok(Self {
            bpm,
            header_page_id,
            leaf_max_size: leaf_max_size(K::ENCODED_LEN, V::ENCODED_LEN),
            internal_max_size: internal_max_size(K::ENCODED_LEN),
            _marker: PhantomData,
        })
    }

    fn root_page_id(&self) -> Result<PageId> {
        let guard = self
            .bpm
            .checked_read_page(self.header_page_id)?
            .ok_or(CrioError::PageNotFound(self.header_page_id))?;
        let bytes: [u8; 8] = guard.data()[0..8].try_into().unwrap();
        Ok(PageId::new(i64::from_le_bytes(bytes)))
    }

    fn set_root_page_id(&self, root: PageId) -> Result<()> {
        let mut guard = self
            .bpm
            .checked_write_page(self.header_page_id)?
            .ok_or(CrioError::PageNotFound(self.header_page_id))?;
        guard.data_mut()[0..8].copy_from_slice(&root.as_i64().to_le_bytes());
        Ok(())
    }

    fn min_leaf_size(&self) -> usize {
        (self.leaf_max_size + 1) / 2
    }

    fn min_internal_size(&self) -> usize {
        (self.internal_max_size + 1) / 2
    }

    /// Descends from `root` to the leaf that would hold `key`.
    fn find_leaf(&self, root: PageId, key: &K) -> Result<PageId> {
        let mut current = root;
        loop {
            let next = {
                let guard = self
                    .bpm
                    .checked_read_page(current)?
                    .ok_or(CrioError::PageNotFound(current))?;
                let node = NodeRef::<K, V>::new(guard.data())?;
                if node.is_leaf() {
                    return Ok(current);
                }
                let idx = node.search_child(key);
                node.get_child(idx)
            };
            current = next;
        }
    }

    fn find_leftmost_leaf(&self, root: PageId) -> Result<PageId> {
        let mut current = root;
        loop {
            let next = {
                let guard = self
                    .bpm
                    .checked_read_page(current)?
                    .ok_or(CrioError::PageNotFound(current))?;
                let node = NodeRef::<K, V>::new(guard.data())?;
                if node.is_leaf() {
                    return Ok(current);
                }
                node.get_child(0)
            };
            current = next;
        }
    }

    fn peek_size(&self, page_id: PageId) -> Result<usize> {
        let guard = self
            .bpm
            .checked_read_page(page_id)?
            .ok_or(CrioError::PageNotFound(page_id))?;
        Ok(NodeRef::<K, V>::new(guard.data())?.size())
    }

    /// Pins both pages and returns their write guards in `(a, b)` order,
    /// always acquiring in ascending `page_id` order underneath so that two
    /// concurrent structural operations touching the same sibling pair can
    /// never deadlock on each other.
    fn write_two(
        &self,
        a: PageId,
        b: PageId,
    ) -> Result<(
        crate::buffer::WritePageGuard,
        crate::buffer::WritePageGuard,
    )> {
        if a.as_i64() < b.as_i64() {
            let ga = self
                .bpm
                .checked_write_page(a)?
                .ok_or(CrioError::PageNotFound(a))?;
            let gb = self
                .bpm
                .checked_write_page(b)?
                .ok_or(CrioError::PageNotFound(b))?;
            Ok((ga, gb))
        } else {
            let gb = self
                .bpm
                .checked_write_page(b)?
                .ok_or(CrioError::PageNotFound(b))?;
            let ga = self
                .bpm
                .checked_write_page(a)?
                .ok_or(CrioError::PageNotFound(a))?;
            Ok((ga, gb))
        }
    }

    fn set_child_parent(&self, child_id: PageId, parent_id: PageId) -> Result<()> {
        let mut guard = self
            .bpm
            .checked_write_page(child_id)?
            .ok_or(CrioError::PageNotFound(child_id))?;
        let mut node = Node::<K, V>::new_checked(guard.data_mut())?;
        node.set_parent_id(parent_id);
        Ok(())
    }

    /// Looks up `key`. `None` if the tree is empty or the key is absent.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let root = self.root_page_id()?;
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }

        let leaf_id = self.find_leaf(root, key)?;
        let guard = self
            .bpm
            .checked_read_page(leaf_id)?
            .ok_or(CrioError::PageNotFound(leaf_id))?;
        let node = NodeRef::<K, V>::new(guard.data())?;

        let pos = node.search_key(key);
        if pos < node.size() && node.get_key(pos) == *key {
            Ok(Some(node.get_value(pos)))
        } else {
            Ok(None)
        }
    }

    /// Inserts `(key, value)`, overwriting any existing value for `key`.
    /// Always returns `true` (overwrite is supported, not refused).
    pub fn put(&self, key: K, value: V) -> Result<bool> {
        let root = self.root_page_id()?;

        if root == INVALID_PAGE_ID {
            let leaf_id = self.bpm.new_page()?;
            {
                let mut guard = self
                    .bpm
                    .checked_write_page(leaf_id)?
                    .ok_or(CrioError::PageNotFound(leaf_id))?;
                let mut node = Node::<K, V>::new(guard.data_mut());
                node.init(leaf_id, true, self.leaf_max_size);
                node.insert_leaf_entry(key, value);
            }
            self.set_root_page_id(leaf_id)?;
            return Ok(true);
        }

        let leaf_id = self.find_leaf(root, &key)?;

        let overflow = {
            let mut guard = self
                .bpm
                .checked_write_page(leaf_id)?
                .ok_or(CrioError::PageNotFound(leaf_id))?;
            let mut node = Node::<K, V>::new_checked(guard.data_mut())?;

            let pos = node.search_key(&key);
            if pos < node.size() && node.get_key(pos) == key {
                node.set_value(pos, &value);
                return Ok(true);
            }

            if node.size() < node.max_size() {
                node.insert_leaf_entry(key, value);
                return Ok(true);
            }

            let parent_id = node.parent_id();
            let next_leaf_id = node.next_leaf_id();
            let (separator, right_entries) = node.split_leaf_with_overflow(key, value);
            (parent_id, next_leaf_id, separator, right_entries)
        };
        let (parent_id, next_leaf_id, separator, right_entries) = overflow;

        let new_leaf_id = self.bpm.new_page()?;
        {
            let mut guard = self
                .bpm
                .checked_write_page(new_leaf_id)?
                .ok_or(CrioError::PageNotFound(new_leaf_id))?;
            let mut node = Node::<K, V>::new(guard.data_mut());
            node.init(new_leaf_id, true, self.leaf_max_size);
            node.load_leaf_entries(&right_entries);
            node.set_parent_id(parent_id);
            node.set_next_leaf_id(next_leaf_id);
        }
        {
            let mut guard = self
                .bpm
                .checked_write_page(leaf_id)?
                .ok_or(CrioError::PageNotFound(leaf_id))?;
            let mut node = Node::<K, V>::new_checked(guard.data_mut())?;
            node.set_next_leaf_id(new_leaf_id);
        }

        self.insert_in_parent(leaf_id, parent_id, separator, new_leaf_id)?;
        Ok(true)
    }

    /// Propagates `separator` (splitting `left_id` into `left_id`/`right_id`)
    /// into `left_id`'s parent, recursing through further internal splits and
    /// creating a new root if `left_id` had none.
    fn insert_in_parent(
        &self,
        left_id: PageId,
        parent_id: PageId,
        separator: K,
        right_id: PageId,
    ) -> Result<()> {
        if parent_id == INVALID_PAGE_ID {
            let new_root_id = self.bpm.new_page()?;
            {
                let mut guard = self
                    .bpm
                    .checked_write_page(new_root_id)?
                    .ok_or(CrioError::PageNotFound(new_root_id))?;
                let mut node = Node::<K, V>::new(guard.data_mut());
                node.init(new_root_id, false, self.internal_max_size);
                node.init_root(separator, left_id, right_id);
            }
            self.set_child_parent(left_id, new_root_id)?;
            self.set_child_parent(right_id, new_root_id)?;
            self.set_root_page_id(new_root_id)?;
            return Ok(());
        }

        let overflow = {
            let mut guard = self
                .bpm
                .checked_write_page(parent_id)?
                .ok_or(CrioError::PageNotFound(parent_id))?;
            let mut node = Node::<K, V>::new_checked(guard.data_mut())?;

            if node.size() < node.max_size() {
                node.insert_child_after(left_id, separator, right_id);
                None
            } else {
                let grandparent_id = node.parent_id();
                let (promoted, right_first, right_rest) =
                    node.split_internal_with_overflow(left_id, separator, right_id);
                Some((grandparent_id, promoted, right_first, right_rest))
            }
        };

        let Some((grandparent_id, promoted, right_first, right_rest)) = overflow else {
            self.set_child_parent(right_id, parent_id)?;
            return Ok(());
        };

        let new_internal_id = self.bpm.new_page()?;
        {
            let mut guard = self
                .bpm
                .checked_write_page(new_internal_id)?
                .ok_or(CrioError::PageNotFound(new_internal_id))?;
            let mut node = Node::<K, V>::new(guard.data_mut());
            node.init(new_internal_id, false, self.internal_max_size);
            node.load_internal_entries(right_first, &right_rest);
            node.set_parent_id(grandparent_id);
        }

        self.set_child_parent(right_first, new_internal_id)?;
        for (_, child) in &right_rest {
            self.set_child_parent(*child, new_internal_id)?;
        }

        self.insert_in_parent(parent_id, grandparent_id, promoted, new_internal_id)
    }

    /// Removes `key`. Returns `false` if absent. Errors with `EmptyStore` if
    /// the tree currently has no root.
    pub fn delete(&self, key: &K) -> Result<bool> {
        let root = self.root_page_id()?;
        if root == INVALID_PAGE_ID {
            return Err(CrioError::EmptyStore);
        }

        let leaf_id = self.find_leaf(root, key)?;

        let outcome = {
            let mut guard = self
                .bpm
                .checked_write_page(leaf_id)?
                .ok_or(CrioError::PageNotFound(leaf_id))?;
            let mut node = Node::<K, V>::new_checked(guard.data_mut())?;

            let pos = node.search_key(key);
            if pos >= node.size() || node.get_key(pos) != *key {
                None
            } else {
                node.remove_leaf_entry(pos);
                let is_root = node.parent_id() == INVALID_PAGE_ID;
                Some((is_root, node.parent_id(), node.size()))
            }
        };

        let Some((is_root, parent_id, size_after)) = outcome else {
            return Ok(false);
        };

        if is_root {
            if size_after == 0 {
                self.set_root_page_id(INVALID_PAGE_ID)?;
            }
            return Ok(true);
        }

        if size_after >= self.min_leaf_size() {
            return Ok(true);
        }

        self.repair_after_leaf_underflow(leaf_id, parent_id)?;
        Ok(true)
    }

    fn repair_after_leaf_underflow(&self, leaf_id: PageId, parent_id: PageId) -> Result<()> {
        let (idx, left_sibling, right_sibling) = {
            let guard = self
                .bpm
                .checked_read_page(parent_id)?
                .ok_or(CrioError::PageNotFound(parent_id))?;
            let node = NodeRef::<K, V>::new(guard.data())?;
            let idx = node
                .index_of_child(leaf_id)
                .expect("leaf must be a child of its parent");
            let left = (idx > 0).then(|| node.get_child(idx - 1));
            let right = (idx + 1 < node.size()).then(|| node.get_child(idx + 1));
            (idx, left, right)
        };

        if let Some(left_id) = left_sibling {
            if self.peek_size(left_id)? > self.min_leaf_size() {
                return self.borrow_from_left_leaf(parent_id, idx, left_id, leaf_id);
            }
        }
        if let Some(right_id) = right_sibling {
            if self.peek_size(right_id)? > self.min_leaf_size() {
                return self.borrow_from_right_leaf(parent_id, idx, leaf_id, right_id);
            }
        }
        if let Some(left_id) = left_sibling {
            return self.merge_leaves(parent_id, idx - 1, left_id, leaf_id);
        }
        if let Some(right_id) = right_sibling {
            return self.merge_leaves(parent_id, idx, leaf_id, right_id);
        }

        Ok(())
    }

    fn borrow_from_left_leaf(
        &self,
        parent_id: PageId,
        idx: usize,
        left_id: PageId,
        leaf_id: PageId,
    ) -> Result<()> {
        let (mut left_guard, mut leaf_guard) = self.write_two(left_id, leaf_id)?;

        let key = {
            let mut left = Node::<K, V>::new_checked(left_guard.data_mut())?;
            let last = left.size() - 1;
            let key = left.get_key(last);
            let value = left.get_value(last);
            left.remove_leaf_entry(last);

            let mut leaf = Node::<K, V>::new_checked(leaf_guard.data_mut())?;
            leaf.insert_leaf_entry(key.clone(), value);
            key
        };
        drop(left_guard);
        drop(leaf_guard);

        let mut parent_guard = self
            .bpm
            .checked_write_page(parent_id)?
            .ok_or(CrioError::PageNotFound(parent_id))?;
        Node::<K, V>::new_checked(parent_guard.data_mut())?.set_key(idx, &key);
        Ok(())
    }

    fn borrow_from_right_leaf(
        &self,
        parent_id: PageId,
        idx: usize,
        leaf_id: PageId,
        right_id: PageId,
    ) -> Result<()> {
        let (mut leaf_guard, mut right_guard) = self.write_two(leaf_id, right_id)?;

        let new_first_key = {
            let mut right = Node::<K, V>::new_checked(right_guard.data_mut())?;
            let key = right.get_key(0);
            let value = right.get_value(0);
            right.remove_leaf_entry(0);
            let new_first_key = right.get_key(0);

            let mut leaf = Node::<K, V>::new_checked(leaf_guard.data_mut())?;
            leaf.insert_leaf_entry(key, value);
            new_first_key
        };
        drop(leaf_guard);
        drop(right_guard);

        let mut parent_guard = self
            .bpm
            .checked_write_page(parent_id)?
            .ok_or(CrioError::PageNotFound(parent_id))?;
        Node::<K, V>::new_checked(parent_guard.data_mut())?.set_key(idx + 1, &new_first_key);
        Ok(())
    }

    fn merge_leaves(
        &self,
        parent_id: PageId,
        left_idx: usize,
        left_id: PageId,
        right_id: PageId,
    ) -> Result<()> {
        {
            let (mut left_guard, mut right_guard) = self.write_two(left_id, right_id)?;
            let right_node = Node::<K, V>::new_checked(right_guard.data_mut())?;
            let mut left_node = Node::<K, V>::new_checked(left_guard.data_mut())?;
            left_node.merge_leaf(&right_node);
        }

        self.bpm.delete_page(right_id)?;
        self.fix_internal_after_child_removal(parent_id, left_idx + 1)
    }

    /// Removes the child at `removed_index` from `node_id` and, if that
    /// leaves it under-full, recursively fixes it up (or, if `node_id` is
    /// the root, collapses it once it holds a single child).
    fn fix_internal_after_child_removal(&self, node_id: PageId, removed_index: usize) -> Result<()> {
        let (is_root, parent_id, size_after) = {
            let mut guard = self
                .bpm
                .checked_write_page(node_id)?
                .ok_or(CrioError::PageNotFound(node_id))?;
            let mut node = Node::<K, V>::new_checked(guard.data_mut())?;
            node.remove_child(removed_index);
            (node.parent_id() == INVALID_PAGE_ID, node.parent_id(), node.size())
        };

        if is_root {
            if size_after == 1 {
                let only_child = {
                    let guard = self
                        .bpm
                        .checked_read_page(node_id)?
                        .ok_or(CrioError::PageNotFound(node_id))?;
                    NodeRef::<K, V>::new(guard.data())?.get_child(0)
                };
                self.set_child_parent(only_child, INVALID_PAGE_ID)?;
                self.set_root_page_id(only_child)?;
                self.bpm.delete_page(node_id)?;
            }
            return Ok(());
        }

        if size_after >= self.min_internal_size() {
            return Ok(());
        }

        self.repair_after_internal_underflow(node_id, parent_id)
    }

    fn repair_after_internal_underflow(&self, node_id: PageId, parent_id: PageId) -> Result<()> {
        let (idx, left_sibling, right_sibling) = {
            let guard = self
                .bpm
                .checked_read_page(parent_id)?
                .ok_or(CrioError::PageNotFound(parent_id))?;
            let node = NodeRef::<K, V>::new(guard.data())?;
            let idx = node
                .index_of_child(node_id)
                .expect("node must be a child of its parent");
            let left = (idx > 0).then(|| node.get_child(idx - 1));
            let right = (idx + 1 < node.size()).then(|| node.get_child(idx + 1));
            (idx, left, right)
        };

        if let Some(left_id) = left_sibling {
            if self.peek_size(left_id)? > self.min_internal_size() {
                return self.borrow_from_left_internal(parent_id, idx, left_id, node_id);
            }
        }
        if let Some(right_id) = right_sibling {
            if self.peek_size(right_id)? > self.min_internal_size() {
                return self.borrow_from_right_internal(parent_id, idx, node_id, right_id);
            }
        }
        if let Some(left_id) = left_sibling {
            return self.merge_internals(parent_id, idx - 1, left_id, node_id);
        }
        if let Some(right_id) = right_sibling {
            return self.merge_internals(parent_id, idx, node_id, right_id);
        }

        Ok(())
    }

    /// Rotates the left sibling's last child through the parent separator:
    /// the separator drops down to become `node_id`'s new first key, and the
    /// left sibling's last key rises to take its place in the parent.
    fn borrow_from_left_internal(
        &self,
        parent_id: PageId,
        idx: usize,
        left_id: PageId,
        node_id: PageId,
    ) -> Result<()> {
        let (mut left_guard, mut node_guard) = self.write_two(left_id, node_id)?;
        let mut parent_guard = self
            .bpm
            .checked_write_page(parent_id)?
            .ok_or(CrioError::PageNotFound(parent_id))?;

        let mut parent = Node::<K, V>::new_checked(parent_guard.data_mut())?;
        let parent_sep = parent.get_key(idx);

        let moved_child = {
            let mut left = Node::<K, V>::new_checked(left_guard.data_mut())?;
            let left_last_key = left.get_key(left.size() - 1);
            let moved_child = left.remove_last_child();

            let mut node = Node::<K, V>::new_checked(node_guard.data_mut())?;
            node.insert_child_before_first(moved_child, parent_sep);

            parent.set_key(idx, &left_last_key);
            moved_child
        };
        drop(parent_guard);
        drop(left_guard);
        drop(node_guard);

        self.set_child_parent(moved_child, node_id)
    }

    /// Rotates the right sibling's first child through the parent separator.
    fn borrow_from_right_internal(
        &self,
        parent_id: PageId,
        idx: usize,
        node_id: PageId,
        right_id: PageId,
    ) -> Result<()> {
        let (mut node_guard, mut right_guard) = self.write_two(node_id, right_id)?;
        let mut parent_guard = self
            .bpm
            .checked_write_page(parent_id)?
            .ok_or(CrioError::PageNotFound(parent_id))?;

        let mut parent = Node::<K, V>::new_checked(parent_guard.data_mut())?;
        let old_sep = parent.get_key(idx + 1);

        let moved_child = {
            let mut right = Node::<K, V>::new_checked(right_guard.data_mut())?;
            let new_sep = right.get_key(1);
            let moved_child = right.remove_first_child();

            let mut node = Node::<K, V>::new_checked(node_guard.data_mut())?;
            node.append_child(old_sep, moved_child);

            parent.set_key(idx + 1, &new_sep);
            moved_child
        };
        drop(parent_guard);
        drop(node_guard);
        drop(right_guard);

        self.set_child_parent(moved_child, node_id)
    }

    fn merge_internals(
        &self,
        parent_id: PageId,
        left_idx: usize,
        left_id: PageId,
        right_id: PageId,
    ) -> Result<()> {
        let separator = {
            let guard = self
                .bpm
                .checked_read_page(parent_id)?
                .ok_or(CrioError::PageNotFound(parent_id))?;
            NodeRef::<K, V>::new(guard.data())?.get_key(left_idx + 1)
        };

        let right_children = {
            let (mut left_guard, mut right_guard) = self.write_two(left_id, right_id)?;
            let right_node = Node::<K, V>::new_checked(right_guard.data_mut())?;
            let right_children: Vec<PageId> =
                (0..right_node.size()).map(|i| right_node.get_child(i)).collect();

            let mut left_node = Node::<K, V>::new_checked(left_guard.data_mut())?;
            left_node.merge_internal(separator, &right_node);
            right_children
        };

        self.bpm.delete_page(right_id)?;
        for child in right_children {
            self.set_child_parent(child, left_id)?;
        }

        self.fix_internal_after_child_removal(parent_id, left_idx + 1)
    }

    /// Returns every value whose key falls in `[start, stop]`, inclusive.
    pub fn get_range(&self, start: &K, stop: &K) -> Result<Vec<V>> {
        let root = self.root_page_id()?;
        if root == INVALID_PAGE_ID {
            return Ok(Vec::new());
        }

        let leaf_id = self.find_leaf(root, start)?;
        let mut iter = BTreeIterator::<K, V>::new(Arc::clone(&self.bpm), leaf_id);

        let mut results = Vec::new();
        while let Some((key, value)) = iter.next()? {
            if &key < start {
                continue;
            }
            if &key > stop {
                break;
            }
            results.push(value);
        }

        Ok(results)
    }

    /// An in-order iterator over the whole tree.
    pub fn iterator(&self) -> Result<BTreeIterator<K, V>> {
        let root = self.root_page_id()?;
        let start = if root == INVALID_PAGE_ID {
            INVALID_PAGE_ID
        } else {
            self.find_leftmost_leaf(root)?
        };
        Ok(BTreeIterator::new(Arc::clone(&self.bpm), start))
    }

    /// Inserts every `(key, value)` pair in `entries` via repeated `put`.
    /// No cross-entry atomicity: a failure partway through leaves earlier
    /// entries inserted.
    pub fn put_batch(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Flushes every dirty page through the buffer pool.
    pub fn flush(&self) -> Result<()> {
        self.bpm.flush_all_pages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn open_tree<K: BTreeKey, V: BTreeValue>() -> (BPlusTree<K, V>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(10, 2, disk_manager));
        (BPlusTree::new(bpm).unwrap(), temp_file)
    }

    #[test]
    fn test_simple_put_get() {
        let (tree, _temp) = open_tree::<i32, i32>();

        assert!(tree.put(10, 100).unwrap());
        assert!(tree.put(20, 200).unwrap());
        assert!(tree.put(5, 50).unwrap());

        assert_eq!(tree.get(&10).unwrap(), Some(100));
        assert_eq!(tree.get(&20).unwrap(), Some(200));
        assert_eq!(tree.get(&5).unwrap(), Some(50));
        assert_eq!(tree.get(&999).unwrap(), None);
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let (tree, _temp) = open_tree::<i32, i32>();

        tree.put(1, 10).unwrap();
        tree.put(1, 20).unwrap();

        assert_eq!(tree.get(&1).unwrap(), Some(20));
    }

    #[test]
    fn test_empty_tree_returns_none() {
        let (tree, _temp) = open_tree::<i32, i32>();
        assert_eq!(tree.get(&1).unwrap(), None);
    }

    #[test]
    fn test_delete_on_empty_tree_is_empty_store() {
        let (tree, _temp) = open_tree::<i32, i32>();
        assert!(matches!(tree.delete(&1), Err(CrioError::EmptyStore)));
    }

    #[test]
    fn test_put_delete_get_roundtrip() {
        let (tree, _temp) = open_tree::<i32, i32>();

        tree.put(1, 10).unwrap();
        assert!(tree.delete(&1).unwrap());
        assert_eq!(tree.get(&1).unwrap(), None);
        assert!(!tree.delete(&1).unwrap());
    }

    #[test]
    fn test_insert_causes_split_and_iterates_in_order() {
        let (tree, _temp) = open_tree::<i32, i32>();

        for i in (0..=100).rev() {
            tree.put(i, i).unwrap();
        }

        for i in 0..=100 {
            assert_eq!(tree.get(&i).unwrap(), Some(i));
        }

        let collected: Vec<(i32, i32)> = tree
            .iterator()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let expected: Vec<(i32, i32)> = (0..=100).map(|i| (i, i)).collect();
        assert_eq!(collected, expected);
    }

    #[test]
    fn test_range_scan() {
        let (tree, _temp) = open_tree::<i32, i32>();

        for i in (0..=100).rev() {
            tree.put(i, i).unwrap();
        }

        let range = tree.get_range(&30, &70).unwrap();
        let expected: Vec<i32> = (30..=70).collect();
        assert_eq!(range, expected);
    }

    #[test]
    fn test_delete_with_cascading_merges() {
        let (tree, _temp) = open_tree::<i32, i32>();

        for i in (0..=200).rev() {
            tree.put(i, i).unwrap();
        }
        for i in 0..100 {
            assert!(tree.delete(&i).unwrap());
        }

        let collected: Vec<i32> = tree
            .iterator()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();

        let expected: Vec<i32> = (100..=200).collect();
        assert_eq!(collected, expected);
        assert_eq!(collected.first(), Some(&100));
        assert_eq!(collected.last(), Some(&200));
    }

    #[test]
    fn test_random_insert_delete_leaves_consistent_order() {
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        let (tree, _temp) = open_tree::<i32, i32>();

        let mut keys: Vec<i32> = (0..500).collect();
        keys.shuffle(&mut thread_rng());
        for &k in &keys {
            tree.put(k, k * 10).unwrap();
        }

        let mut to_delete = keys.clone();
        to_delete.shuffle(&mut thread_rng());
        for &k in to_delete.iter().take(250) {
            assert!(tree.delete(&k).unwrap());
        }

        let remaining: Vec<i32> = tree
            .iterator()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();

        let mut expected: Vec<i32> = to_delete[250..]
            .iter()
            .chain(keys.iter().filter(|k| !to_delete[..250].contains(k)))
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        expected.sort_unstable();

        assert_eq!(remaining, expected);
        for w in remaining.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_file = NamedTempFile::new().unwrap();

        {
            let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
            let bpm = Arc::new(BufferPoolManager::new(10, 2, disk_manager));
            let tree = BPlusTree::<i32, i32>::new(bpm).unwrap();
            for i in 0..50 {
                tree.put(i, i * 2).unwrap();
            }
            tree.flush().unwrap();
        }

        {
            let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
            let bpm = Arc::new(BufferPoolManager::new(10, 2, disk_manager));
            let tree = BPlusTree::<i32, i32>::new(bpm).unwrap();
            for i in 0..50 {
                assert_eq!(tree.get(&i).unwrap(), Some(i * 2));
            }
        }
    }

    #[test]
    fn test_put_batch() {
        let (tree, _temp) = open_tree::<i32, i32>();
        tree.put_batch((0..20).map(|i| (i, i * i))).unwrap();

        for i in 0..20 {
            assert_eq!(tree.get(&i).unwrap(), Some(i * i));
        }
    }
}
