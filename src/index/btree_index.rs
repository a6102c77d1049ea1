use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{IndexKey, PageId, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_iterator::BPlusTreeIterator;
use super::btree_page::{
    page_type_of, parent_of, set_parent, size_of, BTreePageType, InternalPage, InternalPageRef,
    LeafPage, LeafPageRef,
};
use super::key_comparator::KeyComparator;

/// Guards publication of the root page id
type RootLatch<'a> = RwLockWriteGuard<'a, PageId>;

#[derive(Clone, Copy)]
enum WriteOp {
    Insert,
    Delete,
}

/// B+ tree index over the buffer pool: a persistent, ordered, unique
/// key -> RecordId mapping with point lookup, range scan, insert and
/// delete.
///
/// Every node is a page borrowed from the pool. Mutations descend with
/// latch crabbing: each page is write-latched on the way down, and all
/// ancestor latches are released as soon as a child is known not to
/// propagate a structural change. The retained suffix of the path is
/// exactly the subtree a split or merge may touch.
///
/// The root page id is republished in the header page on every change, so
/// a tree can be re-opened by name against the same database file.
pub struct BPlusTree {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    leaf_max_size: usize,
    internal_max_size: usize,
    root_page_id: RwLock<PageId>,
}

impl BPlusTree {
    /// Opens the named index, registering it in the header page on first
    /// use. An existing root recorded under `name` is re-attached.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let index_name = name.into();

        assert!(leaf_max_size >= 2, "leaf max size too small");
        assert!(internal_max_size >= 3, "internal max size too small");

        let existing = {
            let guard = bpm.checked_read_page(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data()).get_root_page_id(&index_name)
        };

        let root = match existing {
            Some(root) => root,
            None => {
                let mut guard = bpm.checked_write_page(HEADER_PAGE_ID)?;
                let mut header = HeaderPage::new(guard.data_mut());
                header.insert_record(&index_name, INVALID_PAGE_ID)?;
                INVALID_PAGE_ID
            }
        };

        Ok(Self {
            index_name,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_page_id: RwLock::new(root),
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup.
    pub fn get_value(&self, key: IndexKey) -> Result<Option<RecordId>> {
        let root_latch = self.root_page_id.read();
        let root = *root_latch;
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.checked_read_page(root)?;
        drop(root_latch);

        loop {
            let child = match page_type_of(guard.data()) {
                BTreePageType::Leaf => {
                    let leaf = LeafPageRef::new(guard.data());
                    return Ok(leaf.lookup(key, self.comparator.as_ref()));
                }
                BTreePageType::Internal => {
                    let page = InternalPageRef::new(guard.data());
                    page.child_at(page.child_index_for(key, self.comparator.as_ref()))
                }
            };
            // Latch the child before releasing the parent.
            let child_guard = self.bpm.checked_read_page(child)?;
            guard = child_guard;
        }
    }

    /// Inserts a key/value pair. Returns false when the key already exists;
    /// the tree is left unchanged in that case.
    pub fn insert(&self, key: IndexKey, value: RecordId) -> Result<bool> {
        let mut root_latch = Some(self.root_page_id.write());

        let root = **root_latch.as_ref().unwrap();
        if root == INVALID_PAGE_ID {
            return self.start_new_tree(&mut root_latch, key, value);
        }

        let mut path = self.descend_for_write(root, key, &mut root_latch, WriteOp::Insert)?;

        let inserted = {
            let leaf_guard = path.last_mut().unwrap();
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            leaf.insert(key, value, self.comparator.as_ref())
        };
        if !inserted {
            return Ok(false);
        }

        if size_of(path.last().unwrap().data()) > self.leaf_max_size {
            let leaf_guard = path.pop().unwrap();
            self.split_leaf(&mut path, &mut root_latch, leaf_guard)?;
        }
        Ok(true)
    }

    /// Removes a key. Removal of an absent key is a no-op.
    pub fn remove(&self, key: IndexKey) -> Result<()> {
        let mut root_latch = Some(self.root_page_id.write());

        let root = **root_latch.as_ref().unwrap();
        if root == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut path = self.descend_for_write(root, key, &mut root_latch, WriteOp::Delete)?;

        let mut leaf_guard = path.pop().unwrap();
        let removed = {
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            leaf.remove(key, self.comparator.as_ref())
        };
        if !removed {
            return Ok(());
        }

        self.rebalance_after_delete(&mut path, &mut root_latch, leaf_guard)
    }

    /// Iterator positioned at the first entry.
    pub fn begin(&self) -> Result<BPlusTreeIterator> {
        let root_latch = self.root_page_id.read();
        let root = *root_latch;
        if root == INVALID_PAGE_ID {
            return Ok(BPlusTreeIterator::end(Arc::clone(&self.bpm)));
        }

        let mut guard = self.bpm.checked_read_page(root)?;
        drop(root_latch);

        loop {
            match page_type_of(guard.data()) {
                BTreePageType::Leaf => {
                    return Ok(BPlusTreeIterator::new(Arc::clone(&self.bpm), guard, 0));
                }
                BTreePageType::Internal => {
                    let child = InternalPageRef::new(guard.data()).child_at(0);
                    let child_guard = self.bpm.checked_read_page(child)?;
                    guard = child_guard;
                }
            }
        }
    }

    /// Iterator positioned at the first entry whose key is >= `key`.
    pub fn begin_at(&self, key: IndexKey) -> Result<BPlusTreeIterator> {
        let root_latch = self.root_page_id.read();
        let root = *root_latch;
        if root == INVALID_PAGE_ID {
            return Ok(BPlusTreeIterator::end(Arc::clone(&self.bpm)));
        }

        let mut guard = self.bpm.checked_read_page(root)?;
        drop(root_latch);

        loop {
            let child = match page_type_of(guard.data()) {
                BTreePageType::Leaf => {
                    let index = LeafPageRef::new(guard.data()).lower_bound(key, self.comparator.as_ref());
                    return Ok(BPlusTreeIterator::new(Arc::clone(&self.bpm), guard, index));
                }
                BTreePageType::Internal => {
                    let page = InternalPageRef::new(guard.data());
                    page.child_at(page.child_index_for(key, self.comparator.as_ref()))
                }
            };
            let child_guard = self.bpm.checked_read_page(child)?;
            guard = child_guard;
        }
    }

    /// The past-the-end iterator.
    pub fn end(&self) -> BPlusTreeIterator {
        BPlusTreeIterator::end(Arc::clone(&self.bpm))
    }

    fn start_new_tree(
        &self,
        root_latch: &mut Option<RootLatch<'_>>,
        key: IndexKey,
        value: RecordId,
    ) -> Result<bool> {
        let (leaf_id, mut guard) = self.bpm.new_page()?;
        {
            let mut leaf = LeafPage::init(guard.data_mut(), leaf_id, self.leaf_max_size);
            leaf.insert(key, value, self.comparator.as_ref());
        }
        drop(guard);

        **root_latch.as_mut().unwrap() = leaf_id;
        self.update_header_root(leaf_id)?;
        Ok(true)
    }

    /// Write descent with latch crabbing. Returns the retained path of
    /// write guards; the last is the target leaf. Whenever a page proves
    /// safe for `op`, every ancestor guard and the root latch are released.
    fn descend_for_write(
        &self,
        root: PageId,
        key: IndexKey,
        root_latch: &mut Option<RootLatch<'_>>,
        op: WriteOp,
    ) -> Result<Vec<WritePageGuard>> {
        let mut path: Vec<WritePageGuard> = Vec::new();
        let mut current = root;

        loop {
            let guard = self.bpm.checked_write_page(current)?;

            if self.is_safe(guard.data(), op) {
                path.clear();
                *root_latch = None;
            }

            let child = match page_type_of(guard.data()) {
                BTreePageType::Leaf => None,
                BTreePageType::Internal => {
                    let page = InternalPageRef::new(guard.data());
                    Some(page.child_at(page.child_index_for(key, self.comparator.as_ref())))
                }
            };

            path.push(guard);
            match child {
                None => return Ok(path),
                Some(child) => current = child,
            }
        }
    }

    /// A page is insert-safe when one more entry cannot split it, and
    /// delete-safe when one fewer entry cannot underflow it. The root is
    /// delete-unsafe only when a removal could collapse it.
    fn is_safe(&self, data: &[u8], op: WriteOp) -> bool {
        let size = size_of(data);
        match (op, page_type_of(data)) {
            (WriteOp::Insert, BTreePageType::Leaf) => size < self.leaf_max_size,
            (WriteOp::Insert, BTreePageType::Internal) => size < self.internal_max_size - 1,
            (WriteOp::Delete, page_type) => {
                if parent_of(data) == INVALID_PAGE_ID {
                    size > 1
                } else {
                    size > self.min_size(page_type)
                }
            }
        }
    }

    fn min_size(&self, page_type: BTreePageType) -> usize {
        match page_type {
            BTreePageType::Leaf => self.leaf_max_size / 2,
            BTreePageType::Internal => (self.internal_max_size + 1) / 2 - 1,
        }
    }

    fn split_leaf(
        &self,
        path: &mut Vec<WritePageGuard>,
        root_latch: &mut Option<RootLatch<'_>>,
        mut leaf_guard: WritePageGuard,
    ) -> Result<()> {
        let (new_id, mut new_guard) = self.bpm.new_page()?;

        let separator = {
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            let moved = leaf.split_off();

            let mut new_leaf = LeafPage::init(new_guard.data_mut(), new_id, self.leaf_max_size);
            new_leaf.set_parent_page_id(leaf.parent_page_id());
            new_leaf.extend(&moved);
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(Some(new_id));

            moved[0].0
        };

        self.insert_into_parent(path, root_latch, separator, leaf_guard, new_guard)
    }

    /// Installs `separator` between two freshly split siblings, creating a
    /// new root when `left` was the root and recursing when the parent
    /// itself overflows.
    fn insert_into_parent(
        &self,
        path: &mut Vec<WritePageGuard>,
        root_latch: &mut Option<RootLatch<'_>>,
        separator: IndexKey,
        left_guard: WritePageGuard,
        mut right_guard: WritePageGuard,
    ) -> Result<()> {
        if path.is_empty() {
            let mut left_guard = left_guard;
            let left_id = left_guard.page_id();
            let right_id = right_guard.page_id();

            let (root_id, mut root_guard) = self.bpm.new_page()?;
            {
                let mut root =
                    InternalPage::init(root_guard.data_mut(), root_id, self.internal_max_size);
                root.populate_new_root(left_id, separator, right_id);
            }
            set_parent(left_guard.data_mut(), root_id);
            set_parent(right_guard.data_mut(), root_id);
            drop(left_guard);
            drop(right_guard);
            drop(root_guard);

            let latch = root_latch
                .as_mut()
                .expect("root split without the root latch");
            **latch = root_id;
            self.update_header_root(root_id)?;
            return Ok(());
        }

        let mut parent_guard = path.pop().unwrap();
        let parent_id = parent_guard.page_id();
        {
            let mut parent = InternalPage::new(parent_guard.data_mut());
            parent.insert(separator, right_guard.page_id(), self.comparator.as_ref());
            set_parent(right_guard.data_mut(), parent_id);
        }
        drop(left_guard);
        drop(right_guard);

        if size_of(parent_guard.data()) >= self.internal_max_size {
            self.split_internal(path, root_latch, parent_guard)
        } else {
            Ok(())
        }
    }

    fn split_internal(
        &self,
        path: &mut Vec<WritePageGuard>,
        root_latch: &mut Option<RootLatch<'_>>,
        mut old_guard: WritePageGuard,
    ) -> Result<()> {
        let (new_id, mut new_guard) = self.bpm.new_page()?;

        let (hoisted, moved_children) = {
            let mut old = InternalPage::new(old_guard.data_mut());
            let (hoisted, seed_child, moved) = old.split_off();

            let mut new_page =
                InternalPage::init(new_guard.data_mut(), new_id, self.internal_max_size);
            new_page.set_parent_page_id(old.parent_page_id());
            new_page.seed(seed_child, &moved);

            let mut children = vec![seed_child];
            children.extend(moved.iter().map(|slot| slot.1));
            (hoisted, children)
        };

        for child_id in moved_children {
            let mut child_guard = self.bpm.checked_write_page(child_id)?;
            set_parent(child_guard.data_mut(), new_id);
        }

        self.insert_into_parent(path, root_latch, hoisted, old_guard, new_guard)
    }

    /// Restores the size invariant for a page that just shrank, preferring
    /// redistribution (and the left sibling) over merging. A merge deletes
    /// the parent's separator and may propagate the underflow upward.
    fn rebalance_after_delete(
        &self,
        path: &mut Vec<WritePageGuard>,
        root_latch: &mut Option<RootLatch<'_>>,
        mut node_guard: WritePageGuard,
    ) -> Result<()> {
        let node_type = page_type_of(node_guard.data());
        let node_size = size_of(node_guard.data());

        if parent_of(node_guard.data()) == INVALID_PAGE_ID {
            return self.adjust_root(root_latch, node_guard);
        }

        let min = self.min_size(node_type);
        if node_size >= min {
            return Ok(());
        }

        let mut parent_guard = path
            .pop()
            .expect("underflowing page without a latched parent");
        let node_id = node_guard.page_id();

        let (node_index, left_sibling, right_sibling) = {
            let parent = InternalPageRef::new(parent_guard.data());
            let index = parent
                .child_index_of(node_id)
                .expect("page missing from its parent");
            let left = (index > 0).then(|| parent.child_at(index - 1));
            let right = (index < parent.size()).then(|| parent.child_at(index + 1));
            (index, left, right)
        };

        let mut left_guard = match left_sibling {
            Some(page_id) => Some(self.bpm.checked_write_page(page_id)?),
            None => None,
        };
        if let Some(lg) = left_guard.as_mut() {
            if size_of(lg.data()) + node_size >= 2 * min {
                return self.redistribute_from_left(
                    &mut parent_guard,
                    node_index,
                    lg,
                    &mut node_guard,
                    node_type,
                );
            }
        }

        let mut right_guard = match right_sibling {
            Some(page_id) => Some(self.bpm.checked_write_page(page_id)?),
            None => None,
        };
        if let Some(rg) = right_guard.as_mut() {
            if size_of(rg.data()) + node_size >= 2 * min {
                drop(left_guard);
                return self.redistribute_from_right(
                    &mut parent_guard,
                    node_index,
                    &mut node_guard,
                    rg,
                    node_type,
                );
            }
        }

        if let Some(mut lg) = left_guard {
            drop(right_guard);
            self.merge(&mut parent_guard, node_index, &mut lg, node_guard, node_type)?;
        } else {
            let rg = right_guard.expect("non-root page with no siblings");
            self.merge(
                &mut parent_guard,
                node_index + 1,
                &mut node_guard,
                rg,
                node_type,
            )?;
        }

        self.rebalance_after_delete(path, root_latch, parent_guard)
    }

    /// Moves one element from the left sibling through the parent
    /// separator at `sep_index` (= the node's child slot).
    fn redistribute_from_left(
        &self,
        parent_guard: &mut WritePageGuard,
        sep_index: usize,
        left_guard: &mut WritePageGuard,
        node_guard: &mut WritePageGuard,
        node_type: BTreePageType,
    ) -> Result<()> {
        match node_type {
            BTreePageType::Leaf => {
                let (key, value) = {
                    let mut left = LeafPage::new(left_guard.data_mut());
                    let last = left.size() - 1;
                    left.remove_at(last)
                };
                LeafPage::new(node_guard.data_mut()).insert_at(0, key, value);
                InternalPage::new(parent_guard.data_mut()).set_key_at(sep_index, key);
            }
            BTreePageType::Internal => {
                let separator = InternalPageRef::new(parent_guard.data()).key_at(sep_index);
                let (last_key, last_child) =
                    InternalPage::new(left_guard.data_mut()).remove_last();
                InternalPage::new(node_guard.data_mut()).rotate_in_front(separator, last_child);
                InternalPage::new(parent_guard.data_mut()).set_key_at(sep_index, last_key);

                let mut child_guard = self.bpm.checked_write_page(last_child)?;
                set_parent(child_guard.data_mut(), node_guard.page_id());
            }
        }
        Ok(())
    }

    /// Moves one element from the right sibling through the parent
    /// separator at `sep_index + 1` (= the right sibling's child slot).
    fn redistribute_from_right(
        &self,
        parent_guard: &mut WritePageGuard,
        sep_index: usize,
        node_guard: &mut WritePageGuard,
        right_guard: &mut WritePageGuard,
        node_type: BTreePageType,
    ) -> Result<()> {
        match node_type {
            BTreePageType::Leaf => {
                let (key, value) = LeafPage::new(right_guard.data_mut()).remove_at(0);
                LeafPage::new(node_guard.data_mut()).append(key, value);
                let new_separator = LeafPageRef::new(right_guard.data()).key_at(0);
                InternalPage::new(parent_guard.data_mut())
                    .set_key_at(sep_index + 1, new_separator);
            }
            BTreePageType::Internal => {
                let separator = InternalPageRef::new(parent_guard.data()).key_at(sep_index + 1);
                let (front_key, front_child) =
                    InternalPage::new(right_guard.data_mut()).remove_front();
                InternalPage::new(node_guard.data_mut()).append(separator, front_child);
                InternalPage::new(parent_guard.data_mut()).set_key_at(sep_index + 1, front_key);

                let mut child_guard = self.bpm.checked_write_page(front_child)?;
                set_parent(child_guard.data_mut(), node_guard.page_id());
            }
        }
        Ok(())
    }

    /// Concatenates `right` into `left` (bringing the parent separator at
    /// `sep_index` down for internals), deletes the separator slot, and
    /// frees the right page.
    fn merge(
        &self,
        parent_guard: &mut WritePageGuard,
        sep_index: usize,
        left_guard: &mut WritePageGuard,
        right_guard: WritePageGuard,
        node_type: BTreePageType,
    ) -> Result<()> {
        let left_id = left_guard.page_id();
        let right_id = right_guard.page_id();

        match node_type {
            BTreePageType::Leaf => {
                let right = LeafPageRef::new(right_guard.data());
                let entries: Vec<_> = (0..right.size())
                    .map(|i| (right.key_at(i), right.value_at(i)))
                    .collect();
                let next = right.next_page_id();

                let mut left = LeafPage::new(left_guard.data_mut());
                left.extend(&entries);
                left.set_next_page_id(next);
            }
            BTreePageType::Internal => {
                let separator = InternalPageRef::new(parent_guard.data()).key_at(sep_index);
                let right = InternalPageRef::new(right_guard.data());
                let seed_child = right.child_at(0);
                let slots: Vec<_> = (1..=right.size())
                    .map(|i| (right.key_at(i), right.child_at(i)))
                    .collect();

                {
                    let mut left = InternalPage::new(left_guard.data_mut());
                    left.append(separator, seed_child);
                    for &(key, child) in &slots {
                        left.append(key, child);
                    }
                }

                for child_id in std::iter::once(seed_child).chain(slots.iter().map(|s| s.1)) {
                    let mut child_guard = self.bpm.checked_write_page(child_id)?;
                    set_parent(child_guard.data_mut(), left_id);
                }
            }
        }

        InternalPage::new(parent_guard.data_mut()).remove_at(sep_index);

        drop(right_guard);
        self.bpm.delete_page(right_id)?;
        Ok(())
    }

    /// Shrinks the tree at the top: an empty leaf root empties the tree,
    /// and an internal root left with a single child hands the root over
    /// to that child.
    fn adjust_root(
        &self,
        root_latch: &mut Option<RootLatch<'_>>,
        root_guard: WritePageGuard,
    ) -> Result<()> {
        if size_of(root_guard.data()) > 0 {
            return Ok(());
        }
        let root_id = root_guard.page_id();

        match page_type_of(root_guard.data()) {
            BTreePageType::Leaf => {
                let latch = root_latch
                    .as_mut()
                    .expect("emptying the tree without the root latch");
                **latch = INVALID_PAGE_ID;
                drop(root_guard);
                self.update_header_root(INVALID_PAGE_ID)?;
                self.bpm.delete_page(root_id)?;
            }
            BTreePageType::Internal => {
                let child_id = InternalPageRef::new(root_guard.data()).child_at(0);
                {
                    let mut child_guard = self.bpm.checked_write_page(child_id)?;
                    set_parent(child_guard.data_mut(), INVALID_PAGE_ID);
                }

                let latch = root_latch
                    .as_mut()
                    .expect("root collapse without the root latch");
                **latch = child_id;
                drop(root_guard);
                self.update_header_root(child_id)?;
                self.bpm.delete_page(root_id)?;
            }
        }
        Ok(())
    }

    /// Rewrites this index's root record in the header page.
    fn update_header_root(&self, root_id: PageId) -> Result<()> {
        let mut guard = self.bpm.checked_write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root_id) {
            header.insert_record(&self.index_name, root_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SlotId;
    use crate::index::key_comparator::IntegerComparator;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn rid(n: u32) -> RecordId {
        RecordId::new(PageId::new(n), SlotId::new(0))
    }

    fn create_tree(
        pool_size: usize,
        leaf_max: usize,
        internal_max: usize,
    ) -> (BPlusTree, Arc<BufferPoolManager>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, dm));
        let tree = BPlusTree::new(
            "test_index",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            leaf_max,
            internal_max,
        )
        .unwrap();
        (tree, bpm, temp_file)
    }

    #[test]
    fn test_btree_starts_empty() {
        let (tree, _bpm, _temp) = create_tree(10, 4, 4);
        assert!(tree.is_empty());
        assert_eq!(tree.root_page_id(), INVALID_PAGE_ID);
        assert_eq!(tree.get_value(1).unwrap(), None);
    }

    #[test]
    fn test_btree_single_leaf_insert_get() {
        let (tree, _bpm, _temp) = create_tree(10, 4, 4);

        assert!(tree.insert(20, rid(20)).unwrap());
        assert!(tree.insert(10, rid(10)).unwrap());
        assert!(!tree.is_empty());

        assert_eq!(tree.get_value(10).unwrap(), Some(rid(10)));
        assert_eq!(tree.get_value(20).unwrap(), Some(rid(20)));
        assert_eq!(tree.get_value(30).unwrap(), None);
    }

    #[test]
    fn test_btree_duplicate_insert_rejected() {
        let (tree, _bpm, _temp) = create_tree(10, 4, 4);

        assert!(tree.insert(10, rid(1)).unwrap());
        assert!(!tree.insert(10, rid(2)).unwrap());
        assert_eq!(tree.get_value(10).unwrap(), Some(rid(1)));
    }

    #[test]
    fn test_btree_leaf_split_promotes_separator() {
        // With leaf_max_size = 4, the fifth insert splits the root leaf:
        // left [10, 20, 25], right [30, 40], separator 30.
        let (tree, bpm, _temp) = create_tree(10, 4, 4);

        for key in [10, 20, 30, 40] {
            assert!(tree.insert(key, rid(key)).unwrap());
        }
        let old_root = tree.root_page_id();
        assert!(tree.insert(25, rid(25)).unwrap());
        assert_ne!(tree.root_page_id(), old_root);

        {
            let guard = bpm.checked_read_page(tree.root_page_id()).unwrap();
            assert_eq!(page_type_of(guard.data()), BTreePageType::Internal);
            let root = InternalPageRef::new(guard.data());
            assert_eq!(root.size(), 1);
            assert_eq!(root.key_at(1), 30);

            let left_guard = bpm.checked_read_page(root.child_at(0)).unwrap();
            let left = LeafPageRef::new(left_guard.data());
            assert_eq!(
                (0..left.size()).map(|i| left.key_at(i)).collect::<Vec<_>>(),
                vec![10, 20, 25]
            );
            assert_eq!(left.next_page_id(), Some(root.child_at(1)));

            let right_guard = bpm.checked_read_page(root.child_at(1)).unwrap();
            let right = LeafPageRef::new(right_guard.data());
            assert_eq!(
                (0..right.size())
                    .map(|i| right.key_at(i))
                    .collect::<Vec<_>>(),
                vec![30, 40]
            );
        }

        for key in [10, 20, 25, 30, 40] {
            assert_eq!(tree.get_value(key).unwrap(), Some(rid(key)));
        }
    }

    #[test]
    fn test_btree_internal_split_cascade() {
        // leaf_max_size = internal_max_size = 3: inserting 1..=9 in order
        // forces a root split of the internal level as well.
        let (tree, bpm, _temp) = create_tree(20, 3, 3);

        for key in 1..=9 {
            assert!(tree.insert(key, rid(key)).unwrap());
        }

        // Height 3: internal root over internal pages over leaves.
        let root_guard = bpm.checked_read_page(tree.root_page_id()).unwrap();
        assert_eq!(page_type_of(root_guard.data()), BTreePageType::Internal);
        let root = InternalPageRef::new(root_guard.data());
        assert_eq!(root.size(), 1);
        let child_guard = bpm.checked_read_page(root.child_at(0)).unwrap();
        assert_eq!(page_type_of(child_guard.data()), BTreePageType::Internal);
        drop(child_guard);
        drop(root_guard);

        for key in 1..=9 {
            assert_eq!(tree.get_value(key).unwrap(), Some(rid(key)), "key {}", key);
        }

        // Full scan returns 1..=9 in order.
        let mut iter = tree.begin().unwrap();
        let mut keys = Vec::new();
        while let Some((key, _)) = iter.next().unwrap() {
            keys.push(key);
        }
        assert_eq!(keys, (1..=9).collect::<Vec<_>>());
    }

    #[test]
    fn test_btree_delete_merges_and_collapses_root() {
        // Continues the leaf-split scenario: deleting 10 and 20 underflows
        // the left leaf, merges the two leaves, and collapses the root back
        // to a single leaf [25, 30, 40].
        let (tree, bpm, _temp) = create_tree(10, 4, 4);

        for key in [10, 20, 30, 40, 25] {
            tree.insert(key, rid(key)).unwrap();
        }

        tree.remove(10).unwrap();
        tree.remove(20).unwrap();

        let guard = bpm.checked_read_page(tree.root_page_id()).unwrap();
        assert_eq!(page_type_of(guard.data()), BTreePageType::Leaf);
        let leaf = LeafPageRef::new(guard.data());
        assert_eq!(
            (0..leaf.size()).map(|i| leaf.key_at(i)).collect::<Vec<_>>(),
            vec![25, 30, 40]
        );
        drop(guard);

        assert_eq!(tree.get_value(10).unwrap(), None);
        assert_eq!(tree.get_value(25).unwrap(), Some(rid(25)));
    }

    #[test]
    fn test_btree_delete_to_empty() {
        let (tree, _bpm, _temp) = create_tree(10, 3, 3);

        for key in 1..=6 {
            tree.insert(key, rid(key)).unwrap();
        }
        for key in 1..=6 {
            tree.remove(key).unwrap();
        }

        assert!(tree.is_empty());
        assert_eq!(tree.root_page_id(), INVALID_PAGE_ID);
        for key in 1..=6 {
            assert_eq!(tree.get_value(key).unwrap(), None);
        }

        // The tree grows again from empty.
        tree.insert(42, rid(42)).unwrap();
        assert_eq!(tree.get_value(42).unwrap(), Some(rid(42)));
    }

    #[test]
    fn test_btree_remove_absent_key_is_noop() {
        let (tree, _bpm, _temp) = create_tree(10, 4, 4);

        tree.insert(10, rid(10)).unwrap();
        tree.remove(99).unwrap();
        assert_eq!(tree.get_value(10).unwrap(), Some(rid(10)));

        let empty = create_tree(10, 4, 4);
        empty.0.remove(1).unwrap();
        assert!(empty.0.is_empty());
    }

    #[test]
    fn test_btree_iterator_after_split() {
        let (tree, _bpm, _temp) = create_tree(10, 4, 4);

        for key in [10, 20, 30, 40, 25] {
            tree.insert(key, rid(key)).unwrap();
        }

        let mut iter = tree.begin_at(25).unwrap();
        assert_eq!(iter.next().unwrap(), Some((25, rid(25))));
        assert_eq!(iter.next().unwrap(), Some((30, rid(30))));
        assert_eq!(iter.next().unwrap(), Some((40, rid(40))));
        assert_eq!(iter.next().unwrap(), None);
        assert!(iter.is_end());
    }

    #[test]
    fn test_btree_root_persisted_in_header() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(10, 2, dm));

        let tree = BPlusTree::new(
            "orders_pk",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            4,
            4,
        )
        .unwrap();
        for key in 1..=8 {
            tree.insert(key, rid(key)).unwrap();
        }
        let root = tree.root_page_id();
        drop(tree);

        // A second handle opened by name sees the same root.
        let reopened = BPlusTree::new(
            "orders_pk",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            4,
            4,
        )
        .unwrap();
        assert_eq!(reopened.root_page_id(), root);
        for key in 1..=8 {
            assert_eq!(reopened.get_value(key).unwrap(), Some(rid(key)));
        }
    }
}
