use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{CrioError, PageId, Result, INVALID_PAGE_ID};

use super::btree_page::NodeRef;
use super::codec::{BTreeKey, BTreeValue};

/// In-order iterator over a B+ tree's leaf chain. Holds at most one leaf
/// read guard at a time, releasing it before crossing to the next leaf.
pub struct BTreeIterator<K: BTreeKey, V: BTreeValue> {
    bpm: Arc<BufferPoolManager>,
    current_page_id: PageId,
    current_index: usize,
    done: bool,
    _marker: PhantomData<(K, V)>,
}

impl<K: BTreeKey, V: BTreeValue> BTreeIterator<K, V> {
    pub fn new(bpm: Arc<BufferPoolManager>, start_page_id: PageId) -> Self {
        let done = start_page_id == INVALID_PAGE_ID;
        Self {
            bpm,
            current_page_id: start_page_id,
            current_index: 0,
            done,
            _marker: PhantomData,
        }
    }

    pub fn next(&mut self) -> Result<Option<(K, V)>> {
        if self.done {
            return Ok(None);
        }

        loop {
            let (entry, next_leaf) = {
                let guard = self
                    .bpm
                    .checked_read_page(self.current_page_id)?
                    .ok_or(CrioError::PageNotFound(self.current_page_id))?;
                let node = NodeRef::<K, V>::new(guard.data())?;

                if self.current_index < node.size() {
                    let key = node.get_key(self.current_index);
                    let value = node.get_value(self.current_index);
                    (Some((key, value)), None)
                } else {
                    (None, Some(node.next_leaf_id()))
                }
            };

            if let Some(pair) = entry {
                self.current_index += 1;
                return Ok(Some(pair));
            }

            match next_leaf {
                Some(next) if next != INVALID_PAGE_ID => {
                    self.current_page_id = next;
                    self.current_index = 0;
                }
                _ => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }
}

impl<K: BTreeKey, V: BTreeValue> Iterator for BTreeIterator<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match BTreeIterator::next(self) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
