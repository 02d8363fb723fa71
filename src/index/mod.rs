pub mod btree_index;
pub mod btree_iterator;
pub mod btree_page;
pub mod codec;

pub use btree_index::BPlusTree;
pub use btree_iterator::BTreeIterator;
pub use btree_page::{Node, NodeRef};
pub use codec::{BTreeKey, BTreeValue, FixedBytes};
