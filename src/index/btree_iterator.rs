use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{IndexKey, RecordId, Result};

use super::btree_page::LeafPageRef;

/// Forward iterator over the leaf chain.
///
/// Holds a read guard (pin + read latch) on the current leaf, so each
/// visited leaf is observed as a consistent snapshot; the range as a whole
/// is not. Advancing past the last slot latches the next leaf before the
/// current one is released. Dropping the iterator releases the held leaf.
pub struct BPlusTreeIterator {
    bpm: Arc<BufferPoolManager>,
    current: Option<ReadPageGuard>,
    index: usize,
}

impl BPlusTreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, leaf: ReadPageGuard, index: usize) -> Self {
        Self {
            bpm,
            current: Some(leaf),
            index,
        }
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            current: None,
            index: 0,
        }
    }

    /// True once the iterator has run off the end of the leaf chain.
    pub fn is_end(&self) -> bool {
        self.current.is_none()
    }

    /// Yields the next entry, hopping to the sibling leaf when the current
    /// one is exhausted.
    pub fn next(&mut self) -> Result<Option<(IndexKey, RecordId)>> {
        loop {
            let next_page = {
                let Some(guard) = self.current.as_ref() else {
                    return Ok(None);
                };
                let leaf = LeafPageRef::new(guard.data());

                if self.index < leaf.size() {
                    let entry = (leaf.key_at(self.index), leaf.value_at(self.index));
                    self.index += 1;
                    return Ok(Some(entry));
                }
                leaf.next_page_id()
            };

            match next_page {
                Some(page_id) => {
                    let next_guard = self.bpm.checked_read_page(page_id)?;
                    self.current = Some(next_guard);
                    self.index = 0;
                }
                None => {
                    self.current = None;
                    return Ok(None);
                }
            }
        }
    }
}

impl Iterator for BPlusTreeIterator {
    type Item = Result<(IndexKey, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match BPlusTreeIterator::next(self) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
