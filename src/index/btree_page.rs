use std::marker::PhantomData;

use crate::common::{CrioError, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};

use super::codec::{BTreeKey, BTreeValue};

const PAGE_TYPE_OFFSET: usize = 0;
const PAGE_ID_OFFSET: usize = 8;
const PARENT_ID_OFFSET: usize = 16;
const NEXT_LEAF_ID_OFFSET: usize = 24;
const SIZE_OFFSET: usize = 32;
const MAX_SIZE_OFFSET: usize = 36;

/// Bytes before the keys array: `page_type (1) + pad (7) + page_id (8) +
/// parent_id (8) + next_leaf_id (8) + size (4) + max_size (4)`.
pub const HEADER_SIZE: usize = 40;

/// Width of an encoded child pointer (a `PageId`).
const CHILD_SIZE: usize = 8;

pub const PAGE_TYPE_INTERNAL: u8 = 0;
pub const PAGE_TYPE_LEAF: u8 = 1;

/// Checks the header of a page already on disk before it is interpreted as
/// a node: an unrecognized page type or a `size` past `max_size` means the
/// page was corrupted rather than merely empty.
fn validate_header(data: &[u8]) -> Result<()> {
    let page_type = data[PAGE_TYPE_OFFSET];
    if page_type != PAGE_TYPE_INTERNAL && page_type != PAGE_TYPE_LEAF {
        return Err(CrioError::CorruptPage(
            PageId::new(read_i64(data, PAGE_ID_OFFSET)),
            format!("unknown page type byte {page_type}"),
        ));
    }

    let size = read_i32(data, SIZE_OFFSET);
    let max_size = read_i32(data, MAX_SIZE_OFFSET);
    if size < 0 || max_size < 0 || size > max_size {
        return Err(CrioError::CorruptPage(
            PageId::new(read_i64(data, PAGE_ID_OFFSET)),
            format!("size {size} exceeds max_size {max_size}"),
        ));
    }

    Ok(())
}

/// Maximum number of `(key, value)` entries a leaf page can hold for the
/// given fixed key/value widths without exceeding `PAGE_SIZE`.
pub fn leaf_max_size(key_len: usize, value_len: usize) -> usize {
    (PAGE_SIZE - HEADER_SIZE) / (key_len + value_len)
}

/// Maximum number of children an internal page can hold. The page stores
/// `max_size` children and `max_size` key slots (index 0 unused), so its
/// real separator-key capacity is `max_size - 1`.
pub fn internal_max_size(key_len: usize) -> usize {
    (PAGE_SIZE - HEADER_SIZE) / (key_len + CHILD_SIZE)
}

/// Read-write view over a page buffer as a B+ tree node. `K`/`V` determine
/// the byte width of the `keys`/`values` arrays; an internal page ignores
/// `V` and treats its second array as `PageId` children instead.
pub struct Node<'a, K: BTreeKey, V: BTreeValue> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: BTreeKey, V: BTreeValue> Node<'a, K, V> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Wraps a page already holding an initialized node, validating its
    /// header first. Use this (rather than [`Node::new`]) whenever the page
    /// was read from the buffer pool instead of freshly allocated.
    pub fn new_checked(data: &'a mut [u8]) -> Result<Self> {
        assert_eq!(data.len(), PAGE_SIZE);
        validate_header(data)?;
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    /// Initializes an empty page of the given kind.
    pub fn init(&mut self, page_id: PageId, is_leaf: bool, max_size: usize) {
        self.data.fill(0);
        self.set_page_id(page_id);
        self.data[PAGE_TYPE_OFFSET] = if is_leaf {
            PAGE_TYPE_LEAF
        } else {
            PAGE_TYPE_INTERNAL
        };
        self.set_parent_id(INVALID_PAGE_ID);
        self.set_next_leaf_id(INVALID_PAGE_ID);
        self.set_size(0);
        self.set_max_size(max_size);
    }

    pub fn is_leaf(&self) -> bool {
        self.data[PAGE_TYPE_OFFSET] == PAGE_TYPE_LEAF
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(read_i64(self.data, PAGE_ID_OFFSET))
    }

    fn set_page_id(&mut self, page_id: PageId) {
        write_i64(self.data, PAGE_ID_OFFSET, page_id.as_i64());
    }

    pub fn parent_id(&self) -> PageId {
        PageId::new(read_i64(self.data, PARENT_ID_OFFSET))
    }

    pub fn set_parent_id(&mut self, parent_id: PageId) {
        write_i64(self.data, PARENT_ID_OFFSET, parent_id.as_i64());
    }

    pub fn next_leaf_id(&self) -> PageId {
        PageId::new(read_i64(self.data, NEXT_LEAF_ID_OFFSET))
    }

    pub fn set_next_leaf_id(&mut self, next_leaf_id: PageId) {
        write_i64(self.data, NEXT_LEAF_ID_OFFSET, next_leaf_id.as_i64());
    }

    pub fn size(&self) -> usize {
        read_i32(self.data, SIZE_OFFSET) as usize
    }

    fn set_size(&mut self, size: usize) {
        write_i32(self.data, SIZE_OFFSET, size as i32);
    }

    pub fn max_size(&self) -> usize {
        read_i32(self.data, MAX_SIZE_OFFSET) as usize
    }

    fn set_max_size(&mut self, max_size: usize) {
        write_i32(self.data, MAX_SIZE_OFFSET, max_size as i32);
    }

    fn values_offset(&self) -> usize {
        HEADER_SIZE + self.max_size() * K::ENCODED_LEN
    }

    pub fn get_key(&self, index: usize) -> K {
        let offset = HEADER_SIZE + index * K::ENCODED_LEN;
        K::decode(&self.data[offset..offset + K::ENCODED_LEN])
    }

    pub fn set_key(&mut self, index: usize, key: &K) {
        let offset = HEADER_SIZE + index * K::ENCODED_LEN;
        key.encode(&mut self.data[offset..offset + K::ENCODED_LEN]);
    }

    /// Valid only on a leaf page: the value paired with `keys[index]`.
    pub fn get_value(&self, index: usize) -> V {
        let offset = self.values_offset() + index * V::ENCODED_LEN;
        V::decode(&self.data[offset..offset + V::ENCODED_LEN])
    }

    pub fn set_value(&mut self, index: usize, value: &V) {
        let offset = self.values_offset() + index * V::ENCODED_LEN;
        value.encode(&mut self.data[offset..offset + V::ENCODED_LEN]);
    }

    /// Valid only on an internal page: the `index`-th child pointer.
    pub fn get_child(&self, index: usize) -> PageId {
        let offset = self.values_offset() + index * CHILD_SIZE;
        PageId::new(read_i64(self.data, offset))
    }

    pub fn set_child(&mut self, index: usize, child: PageId) {
        let offset = self.values_offset() + index * CHILD_SIZE;
        write_i64(self.data, offset, child.as_i64());
    }

    /// Binary search over a leaf's `keys[0..size)` for the first index whose
    /// key is `>= key`.
    pub fn search_key(&self, key: &K) -> usize {
        let mut left = 0;
        let mut right = self.size();

        while left < right {
            let mid = left + (right - left) / 2;
            if &self.get_key(mid) < key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        left
    }

    /// Leaf-only. Inserts `(key, value)` in sorted position. Caller must
    /// ensure `size() < max_size()` beforehand.
    pub fn insert_leaf_entry(&mut self, key: K, value: V) {
        let pos = self.search_key(&key);
        let size = self.size();

        for i in (pos..size).rev() {
            let shifted_key = self.get_key(i);
            self.set_key(i + 1, &shifted_key);
            let shifted_value = self.get_value(i);
            self.set_value(i + 1, &shifted_value);
        }

        self.set_key(pos, &key);
        self.set_value(pos, &value);
        self.set_size(size + 1);
    }

    /// Leaf-only. Removes the entry at `index`, shifting later entries left.
    pub fn remove_leaf_entry(&mut self, index: usize) {
        let size = self.size();
        for i in index..size - 1 {
            let shifted_key = self.get_key(i + 1);
            self.set_key(i, &shifted_key);
            let shifted_value = self.get_value(i + 1);
            self.set_value(i, &shifted_value);
        }
        self.set_size(size - 1);
    }

    /// Leaf-only. Called when `self` is already full (`size == max_size`) and
    /// `(key, value)` still needs a home. Conceptually inserts into the
    /// combined `L+1` entries, then distributes `mid_point = ceil((L+1)/2)`
    /// to the left (`self`, rewritten in place) and the rest to the returned
    /// vector, whose first key is the separator to propagate upward. This
    /// never writes the overflowing `L+1`-th entry onto the page itself —
    /// the page's byte layout has room for exactly `max_size` entries, so
    /// the combination happens in a scratch `Vec` first.
    pub fn split_leaf_with_overflow(&mut self, key: K, value: V) -> (K, Vec<(K, V)>) {
        let size = self.size();
        let mut entries: Vec<(K, V)> = (0..size).map(|i| (self.get_key(i), self.get_value(i))).collect();

        let pos = entries.partition_point(|(k, _)| k < &key);
        entries.insert(pos, (key, value));

        let mid_point = (entries.len() + 1) / 2;
        let right_entries = entries.split_off(mid_point);

        self.load_leaf_entries(&entries);

        let separator = right_entries[0].0.clone();
        (separator, right_entries)
    }

    /// Leaf-only. Bulk-loads `entries` into an empty page.
    pub fn load_leaf_entries(&mut self, entries: &[(K, V)]) {
        for (i, (key, value)) in entries.iter().enumerate() {
            self.set_key(i, key);
            self.set_value(i, value);
        }
        self.set_size(entries.len());
    }

    /// Internal-only. Creates a fresh two-child root: `children = [left,
    /// right]`, `keys[1] = separator` (`keys[0]` is the permanent unused
    /// sentinel slot).
    pub fn init_root(&mut self, separator: K, left: PageId, right: PageId) {
        self.set_child(0, left);
        self.set_key(1, &separator);
        self.set_child(1, right);
        self.set_size(2);
    }

    /// Internal-only. Finds the child whose subtree may contain `key`: the
    /// largest index `i` in `[1, size-1]` with `keys[i] <= key`, or `0` if
    /// no such index exists.
    pub fn search_child(&self, key: &K) -> usize {
        let size = self.size();
        let mut result = 0;

        let mut left = 1;
        let mut right = size;
        while left < right {
            let mid = left + (right - left) / 2;
            if self.get_key(mid) <= *key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        if left > 1 {
            result = left - 1;
        }
        result
    }

    /// Internal-only. Finds the index of `child` among `children[0..size)`.
    pub fn index_of_child(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.get_child(i) == child)
    }

    /// Internal-only. Inserts `(separator, new_child)` immediately after
    /// `after_child`, shifting later keys/children right by one. Caller
    /// must ensure `size() < max_size()` beforehand.
    pub fn insert_child_after(&mut self, after_child: PageId, separator: K, new_child: PageId) {
        let pos = self
            .index_of_child(after_child)
            .expect("after_child must be a child of this node")
            + 1;
        let size = self.size();

        for i in (pos..size).rev() {
            let shifted_child = self.get_child(i);
            self.set_child(i + 1, shifted_child);
        }
        for i in (pos..size).rev() {
            if i == 0 {
                continue;
            }
            let shifted_key = self.get_key(i);
            self.set_key(i + 1, &shifted_key);
        }

        self.set_key(pos, &separator);
        self.set_child(pos, new_child);
        self.set_size(size + 1);
    }

    /// Internal-only. Removes the child at `index` (and the real key that
    /// precedes it, unless `index == 0`, in which case the key that used to
    /// separate it from child 1 is dropped instead), shifting later entries
    /// left.
    pub fn remove_child(&mut self, index: usize) {
        let size = self.size();

        if index == 0 {
            for i in 1..size - 1 {
                let shifted_key = self.get_key(i + 1);
                self.set_key(i, &shifted_key);
            }
            for i in 0..size - 1 {
                let shifted_child = self.get_child(i + 1);
                self.set_child(i, shifted_child);
            }
        } else {
            for i in index..size - 1 {
                if i > 0 {
                    let shifted_key = self.get_key(i + 1);
                    self.set_key(i, &shifted_key);
                }
                let shifted_child = self.get_child(i + 1);
                self.set_child(i, shifted_child);
            }
        }

        self.set_size(size - 1);
    }

    /// Internal-only. Called when `self` is already full (`size ==
    /// max_size`) and a new `(separator, new_child)` pair still needs a
    /// home immediately after `after_child`. Combines the existing `M`
    /// children with `new_child` into a scratch `Vec` of `M+1` children (and
    /// the `M` real keys between them), splits at the midpoint, rewrites
    /// `self` in place as the left half, and returns the promoted median
    /// key plus the right half (as `first_child`/`rest`, ready for
    /// [`Node::load_internal_entries`]).
    pub fn split_internal_with_overflow(
        &mut self,
        after_child: PageId,
        new_key: K,
        new_child: PageId,
    ) -> (K, PageId, Vec<(K, PageId)>) {
        let size = self.size();
        let mut children: Vec<PageId> = (0..size).map(|i| self.get_child(i)).collect();
        let mut keys: Vec<K> = (1..size).map(|i| self.get_key(i)).collect();

        let child_pos = children
            .iter()
            .position(|&c| c == after_child)
            .expect("after_child must be a child of this node");
        children.insert(child_pos + 1, new_child);
        keys.insert(child_pos, new_key);

        let mid = children.len() / 2;
        let promoted = keys[mid - 1].clone();

        let left_first = children[0];
        let left_rest: Vec<(K, PageId)> = (0..mid - 1)
            .map(|i| (keys[i].clone(), children[i + 1]))
            .collect();
        self.load_internal_entries(left_first, &left_rest);

        let right_first = children[mid];
        let right_rest: Vec<(K, PageId)> = (mid..keys.len())
            .map(|i| (keys[i].clone(), children[i + 1]))
            .collect();

        (promoted, right_first, right_rest)
    }

    /// Internal-only. Bulk-loads an empty page: `children[0]` plus `(key,
    /// child)` pairs forming `children[1..]`/`keys[1..]`. `keys[0]` is left
    /// as the unused sentinel.
    pub fn load_internal_entries(&mut self, first_child: PageId, rest: &[(K, PageId)]) {
        self.set_child(0, first_child);
        for (i, (key, child)) in rest.iter().enumerate() {
            self.set_key(i + 1, key);
            self.set_child(i + 1, child);
        }
        self.set_size(rest.len() + 1);
    }

    /// Internal-only. Prepends `new_first_child` as the new `children[0]`,
    /// pushing the old `children[0]` to index 1 with `separator` as its key.
    /// Caller must ensure `size() < max_size()` beforehand.
    pub fn insert_child_before_first(&mut self, new_first_child: PageId, separator: K) {
        let size = self.size();
        for i in (0..size).rev() {
            let shifted_child = self.get_child(i);
            self.set_child(i + 1, shifted_child);
        }
        for i in (1..size).rev() {
            let shifted_key = self.get_key(i);
            self.set_key(i + 1, &shifted_key);
        }
        self.set_child(0, new_first_child);
        self.set_key(1, &separator);
        self.set_size(size + 1);
    }

    /// Internal-only. Removes `children[0]`, promoting `children[1]` to take
    /// its place. Returns the removed child; the key that used to separate
    /// it from `children[1]` is dropped, since a borrow-from-right caller
    /// supplies its own incoming separator instead.
    pub fn remove_first_child(&mut self) -> PageId {
        let first = self.get_child(0);
        self.remove_child(0);
        first
    }

    /// Internal-only. Removes and returns the last child. The key that used
    /// to separate it from the second-to-last child is left in place but is
    /// now logically stale (it is not read past the new, smaller `size`);
    /// the caller is expected to have already read it via `get_key` before
    /// calling, since a borrow-from-left rotation needs that key to become
    /// the new parent separator.
    pub fn remove_last_child(&mut self) -> PageId {
        let size = self.size();
        let last = self.get_child(size - 1);
        self.set_size(size - 1);
        last
    }

    /// Internal-only. Appends `new_last_child` after the current last
    /// child, with `separator` as its key. Caller must ensure `size() <
    /// max_size()` beforehand.
    pub fn append_child(&mut self, separator: K, new_last_child: PageId) {
        let size = self.size();
        self.set_key(size, &separator);
        self.set_child(size, new_last_child);
        self.set_size(size + 1);
    }

    /// Merges `other`'s entries into `self` (leaf variant): appends all of
    /// `other`'s `(key, value)` pairs after `self`'s own, and adopts
    /// `other`'s `next_leaf_id`.
    pub fn merge_leaf(&mut self, other: &Node<'_, K, V>) {
        let base = self.size();
        for i in 0..other.size() {
            let key = other.get_key(i);
            let value = other.get_value(i);
            self.set_key(base + i, &key);
            self.set_value(base + i, &value);
        }
        self.set_size(base + other.size());
        self.set_next_leaf_id(other.next_leaf_id());
    }

    /// Merges `separator` and all of `other`'s children into `self`
    /// (internal variant): `separator` becomes the real key joining
    /// `self`'s last child to `other`'s first child.
    pub fn merge_internal(&mut self, separator: K, other: &Node<'_, K, V>) {
        let base = self.size();
        self.set_key(base, &separator);
        self.set_child(base, other.get_child(0));
        for i in 1..other.size() {
            let key = other.get_key(i);
            let child = other.get_child(i);
            self.set_key(base + i, &key);
            self.set_child(base + i, child);
        }
        self.set_size(base + other.size());
    }
}

/// Read-only view over a page buffer as a B+ tree node.
pub struct NodeRef<'a, K: BTreeKey, V: BTreeValue> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: BTreeKey, V: BTreeValue> NodeRef<'a, K, V> {
    /// Wraps a page read from the buffer pool, validating its header first.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        assert_eq!(data.len(), PAGE_SIZE);
        validate_header(data)?;
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    pub fn is_leaf(&self) -> bool {
        self.data[PAGE_TYPE_OFFSET] == PAGE_TYPE_LEAF
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(read_i64(self.data, PAGE_ID_OFFSET))
    }

    pub fn parent_id(&self) -> PageId {
        PageId::new(read_i64(self.data, PARENT_ID_OFFSET))
    }

    pub fn next_leaf_id(&self) -> PageId {
        PageId::new(read_i64(self.data, NEXT_LEAF_ID_OFFSET))
    }

    pub fn size(&self) -> usize {
        read_i32(self.data, SIZE_OFFSET) as usize
    }

    pub fn max_size(&self) -> usize {
        read_i32(self.data, MAX_SIZE_OFFSET) as usize
    }

    fn values_offset(&self) -> usize {
        HEADER_SIZE + self.max_size() * K::ENCODED_LEN
    }

    pub fn get_key(&self, index: usize) -> K {
        let offset = HEADER_SIZE + index * K::ENCODED_LEN;
        K::decode(&self.data[offset..offset + K::ENCODED_LEN])
    }

    pub fn get_value(&self, index: usize) -> V {
        let offset = self.values_offset() + index * V::ENCODED_LEN;
        V::decode(&self.data[offset..offset + V::ENCODED_LEN])
    }

    pub fn get_child(&self, index: usize) -> PageId {
        let offset = self.values_offset() + index * CHILD_SIZE;
        PageId::new(read_i64(self.data, offset))
    }

    pub fn search_key(&self, key: &K) -> usize {
        let mut left = 0;
        let mut right = self.size();

        while left < right {
            let mid = left + (right - left) / 2;
            if &self.get_key(mid) < key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        left
    }

    pub fn search_child(&self, key: &K) -> usize {
        let size = self.size();

        let mut left = 1;
        let mut right = size;
        while left < right {
            let mid = left + (right - left) / 2;
            if self.get_key(mid) <= *key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        if left > 1 {
            left - 1
        } else {
            0
        }
    }

    /// Internal-only. Finds the index of `child` among `children[0..size)`.
    pub fn index_of_child(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.get_child(i) == child)
    }
}

fn read_i64(data: &[u8], offset: usize) -> i64 {
    let bytes: [u8; 8] = data[offset..offset + 8].try_into().unwrap();
    i64::from_le_bytes(bytes)
}

fn write_i64(data: &mut [u8], offset: usize, value: i64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn read_i32(data: &[u8], offset: usize) -> i32 {
    let bytes: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
    i32::from_le_bytes(bytes)
}

fn write_i32(data: &mut [u8], offset: usize, value: i32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
