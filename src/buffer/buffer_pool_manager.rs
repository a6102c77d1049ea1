use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{
    CairnError, FrameId, PageId, Result, DEFAULT_BUCKET_SIZE, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Internal state shared with page guards
struct BufferPoolState {
    /// The buffer pool frames
    frames: Vec<Arc<FrameHeader>>,
    /// Page table: maps resident page IDs to frame IDs
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Frames not holding any page
    free_list: Mutex<Vec<FrameId>>,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
    /// Serializes residency transitions (page table + free list + replacer
    /// updates as one step). Never held across disk I/O.
    latch: Mutex<()>,
}

impl BufferPoolState {
    /// Pops a free frame, or evicts a victim and unpublishes its page.
    /// Returns the frame id and the evicted page id, if any. The caller owns
    /// the frame exclusively until it republishes it: the frame is in no
    /// structure any other thread consults.
    fn acquire_frame_locked(&self) -> Result<(FrameId, Option<PageId>)> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok((frame_id, None));
        }

        let frame_id = self.replacer.evict().ok_or(CairnError::BufferPoolFull)?;
        let old_page_id = self.frames[frame_id.as_usize()].page_id();
        self.page_table.remove(&old_page_id);
        Ok((frame_id, Some(old_page_id)))
    }

    /// Pins a resident frame and shields it from eviction.
    fn pin_locked(&self, frame_id: FrameId) {
        self.frames[frame_id.as_usize()].pin();
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
    }

    /// Releases one pin on a resident page, ORing in the dirty bit.
    /// Returns false if the page is not resident or was not pinned.
    fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _guard = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];

        match frame.unpin() {
            None => false,
            Some(remaining) => {
                if is_dirty {
                    frame.set_dirty(true);
                }
                if remaining == 0 {
                    self.replacer.set_evictable(frame_id, true);
                }
                true
            }
        }
    }
}

/// BufferPoolManager caches disk pages in a fixed set of in-memory frames.
///
/// Pages are fetched on demand; when every frame is occupied the LRU-K
/// replacer chooses an unpinned victim, whose contents are written back if
/// dirty. Pages are handed out through RAII guards that pair the pin with
/// the frame latch, so callers cannot hold one without the other.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// Shared state
    state: Arc<BufferPoolState>,
    /// Disk scheduler for I/O
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size, k value for
    /// LRU-K, and disk manager.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = Vec::with_capacity(pool_size);

        for i in (0..pool_size).rev() {
            free_list.push(FrameId::new(i as u32));
        }
        for i in 0..pool_size {
            frames.push(Arc::new(FrameHeader::new(FrameId::new(i as u32))));
        }

        let state = Arc::new(BufferPoolState {
            frames,
            page_table: ExtendibleHashTable::new(DEFAULT_BUCKET_SIZE),
            free_list: Mutex::new(free_list),
            replacer: LruKReplacer::new(k, pool_size),
            latch: Mutex::new(()),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a fresh page on disk and pins it into a frame.
    /// The returned guard adopts the initial pin; dropping it unpins.
    /// Fails with `BufferPoolFull` when no frame is free or evictable.
    pub fn new_page(&self) -> Result<(PageId, WritePageGuard)> {
        let (frame_id, evicted) = {
            let _guard = self.state.latch.lock();
            self.state.acquire_frame_locked()?
        };
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);

        self.write_back_if_dirty(&frame, evicted)?;

        let page_id = self.disk_scheduler.disk_manager().allocate_page()?;
        frame.reset();
        frame.set_page_id(page_id);

        {
            let _guard = self.state.latch.lock();
            self.state.page_table.insert(page_id, frame_id);
            self.state.pin_locked(frame_id);
        }

        let guard = unsafe { WritePageGuard::new(page_id, frame, self.release_callback()) };
        Ok((page_id, guard))
    }

    /// Fetches a page for shared access.
    pub fn checked_read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame_id = self.fetch_frame(page_id)?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);

        let guard = unsafe { ReadPageGuard::new(page_id, frame, self.release_callback()) };
        Ok(guard)
    }

    /// Fetches a page for exclusive access.
    pub fn checked_write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame_id = self.fetch_frame(page_id)?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);

        let guard = unsafe { WritePageGuard::new(page_id, frame, self.release_callback()) };
        Ok(guard)
    }

    /// Releases one pin on a page. The dirty flag is sticky: once set it is
    /// cleared only by a flush or eviction write-back, never by unpin.
    /// Returns false if the page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Writes a resident page to disk unconditionally and clears its dirty
    /// flag. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(CairnError::InvalidPageId(page_id));
        }

        let frame_id = {
            let _guard = self.state.latch.lock();
            let Some(frame_id) = self.state.page_table.find(&page_id) else {
                return Ok(false);
            };
            // Shield the frame from eviction while the latch is dropped for
            // the disk write.
            self.state.frames[frame_id.as_usize()].pin();
            self.state.replacer.set_evictable(frame_id, false);
            frame_id
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        // Clear before the copy so a concurrent re-dirty is not lost.
        frame.set_dirty(false);
        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        let result = self.disk_scheduler.schedule_write_sync(page_id, &data);

        self.state.unpin(page_id, false);
        result?;
        Ok(true)
    }

    /// Flushes every resident page to disk, pinned or not. Intended for
    /// shutdown after the pool has quiesced.
    pub fn flush_all_pages(&self) -> Result<()> {
        for frame in &self.state.frames {
            let page_id = frame.page_id();
            if page_id == INVALID_PAGE_ID {
                continue;
            }

            frame.set_dirty(false);
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
        }

        Ok(())
    }

    /// Deletes a page from the buffer pool and deallocates it on disk.
    /// A page that is not resident is deallocated directly; a pinned page
    /// cannot be deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        {
            let _guard = self.state.latch.lock();
            if let Some(frame_id) = self.state.page_table.find(&page_id) {
                let frame = &self.state.frames[frame_id.as_usize()];
                if frame.pin_count() > 0 {
                    return Err(CairnError::PageStillPinned(page_id));
                }

                self.state.page_table.remove(&page_id);
                self.state.replacer.remove(frame_id);
                frame.reset();
                self.state.free_list.lock().push(frame_id);
            }
        }

        self.disk_scheduler.disk_manager().deallocate_page(page_id)?;
        Ok(true)
    }

    /// Returns the pin count of a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let _guard = self.state.latch.lock();
        self.state
            .page_table
            .find(&page_id)
            .map(|frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.state.free_list.lock().len()
    }

    /// Brings a page into a frame and pins it, returning the frame id.
    fn fetch_frame(&self, page_id: PageId) -> Result<FrameId> {
        if page_id == INVALID_PAGE_ID {
            return Err(CairnError::InvalidPageId(page_id));
        }

        let (frame_id, evicted) = {
            let _guard = self.state.latch.lock();
            if let Some(frame_id) = self.state.page_table.find(&page_id) {
                self.state.pin_locked(frame_id);
                return Ok(frame_id);
            }
            self.state.acquire_frame_locked()?
        };
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);

        self.write_back_if_dirty(&frame, evicted)?;

        let mut data = [0u8; PAGE_SIZE];
        self.disk_scheduler.schedule_read_sync(page_id, &mut data)?;
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.set_page_id(page_id);

        let _guard = self.state.latch.lock();
        if let Some(winner) = self.state.page_table.find(&page_id) {
            // Another thread loaded the page while our latch was dropped.
            // Hand the frame back and use theirs.
            frame.reset();
            self.state.free_list.lock().push(frame_id);
            self.state.pin_locked(winner);
            return Ok(winner);
        }

        self.state.page_table.insert(page_id, frame_id);
        self.state.pin_locked(frame_id);
        Ok(frame_id)
    }

    /// Writes an evicted frame's contents back to disk if they are dirty.
    fn write_back_if_dirty(&self, frame: &FrameHeader, evicted: Option<PageId>) -> Result<()> {
        let Some(old_page_id) = evicted else {
            return Ok(());
        };
        if !frame.is_dirty() {
            return Ok(());
        }

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.disk_scheduler.schedule_write_sync(old_page_id, &data)
    }

    fn release_callback(&self) -> Box<dyn FnOnce(PageId, bool) + Send + Sync> {
        let state = Arc::clone(&self.state);
        Box::new(move |page_id, is_dirty| {
            state.unpin(page_id, is_dirty);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, 2, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_buffer_pool_manager_new() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_buffer_pool_manager_new_page_is_pinned() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, guard) = bpm.new_page().unwrap();
        assert_eq!(page_id, PageId::new(1)); // page 0 is the header page
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);

        drop(guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_buffer_pool_manager_read_write() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, mut guard) = bpm.new_page().unwrap();
        guard.data_mut()[0] = 42;
        guard.data_mut()[100] = 255;
        drop(guard);

        let guard = bpm.checked_read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
        assert_eq!(guard.data()[100], 255);
    }

    #[test]
    fn test_buffer_pool_manager_unpin_page() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, guard) = bpm.new_page().unwrap();
        drop(guard);

        // Already unpinned by the guard.
        assert!(!bpm.unpin_page(page_id, false));
        // Not resident at all.
        assert!(!bpm.unpin_page(PageId::new(999), false));
    }

    #[test]
    fn test_buffer_pool_manager_flush() {
        let (bpm, temp) = create_bpm(10);

        let (page_id, mut guard) = bpm.new_page().unwrap();
        guard.data_mut()[0] = 42;
        drop(guard);

        assert!(bpm.flush_page(page_id).unwrap());
        assert!(!bpm.flush_page(PageId::new(999)).unwrap());

        drop(bpm);

        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm2 = BufferPoolManager::new(10, 2, dm);

        let guard = bpm2.checked_read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_buffer_pool_manager_eviction_writes_back() {
        let (bpm, _temp) = create_bpm(3);

        let mut page_ids = Vec::new();
        for i in 0..3u8 {
            let (pid, mut guard) = bpm.new_page().unwrap();
            guard.data_mut()[0] = i;
            drop(guard);
            page_ids.push(pid);
        }
        assert_eq!(bpm.free_frame_count(), 0);

        // A fourth page evicts one of the first three.
        let (new_pid, guard) = bpm.new_page().unwrap();
        assert_eq!(new_pid, PageId::new(4));
        drop(guard);

        // Every original page still reads its own bytes, whether from the
        // pool or back from disk.
        for (i, &pid) in page_ids.iter().enumerate() {
            let guard = bpm.checked_read_page(pid).unwrap();
            assert_eq!(guard.data()[0], i as u8);
        }
    }

    #[test]
    fn test_buffer_pool_manager_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, guard) = bpm.new_page().unwrap();

        // Cannot delete while pinned.
        assert!(matches!(
            bpm.delete_page(page_id),
            Err(CairnError::PageStillPinned(_))
        ));

        drop(guard);
        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);

        // Deleting a non-resident page deallocates it on disk.
        assert!(bpm.delete_page(page_id).unwrap());
    }

    #[test]
    fn test_buffer_pool_manager_full() {
        let (bpm, _temp) = create_bpm(2);

        let (_pid1, _guard1) = bpm.new_page().unwrap();
        let (_pid2, _guard2) = bpm.new_page().unwrap();

        assert!(matches!(bpm.new_page(), Err(CairnError::BufferPoolFull)));
    }
}
