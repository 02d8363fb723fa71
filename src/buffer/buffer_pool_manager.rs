use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::common::{CrioError, FrameId, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

struct BufferPoolState {
    frames: Vec<Arc<FrameHeader>>,
    page_table: Mutex<HashMap<PageId, FrameId>>,
    free_list: Mutex<VecDeque<FrameId>>,
    replacer: LruKReplacer,
    /// Signaled whenever a frame becomes free or evictable, so that threads
    /// blocked waiting for one can re-check.
    frame_available: Condvar,
}

/// BufferPoolManager is responsible for fetching database pages from disk
/// and storing them in memory. It manages a fixed number of frames and uses
/// the LRU-K replacement policy to decide which pages to evict.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<BufferPoolState>,
    disk_scheduler: DiskScheduler,
    /// When true (the default), a caller that finds no frame free and no
    /// frame evictable blocks on a condvar until one appears instead of
    /// failing immediately.
    blocking: bool,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager that blocks callers until a frame
    /// becomes available when the pool is exhausted.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::new_with_blocking(pool_size, k, disk_manager, true)
    }

    /// Creates a new BufferPoolManager that fails fast with
    /// `CrioError::BufferExhausted` instead of blocking when the pool is
    /// exhausted.
    pub fn new_non_blocking(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::new_with_blocking(pool_size, k, disk_manager, false)
    }

    fn new_with_blocking(
        pool_size: usize,
        k: usize,
        disk_manager: Arc<DiskManager>,
        blocking: bool,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(BufferPoolState {
            frames,
            page_table: Mutex::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: LruKReplacer::new(k, pool_size),
            frame_available: Condvar::new(),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
            blocking,
        }
    }

    /// Creates a new page in the buffer pool and returns its page ID. Blocks
    /// (or fails, in non-blocking mode) if no frame is available.
    pub fn new_page(&self) -> Result<PageId> {
        let frame_id = self.get_free_frame()?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let page_id = self.disk_scheduler.disk_manager().allocate_page()?;

        frame.reset();
        frame.set_page_id(page_id);

        self.state.page_table.lock().insert(page_id, frame_id);

        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, true);
        self.state.frame_available.notify_all();

        Ok(page_id)
    }

    /// Deletes a page from the buffer pool and disk.
    /// Returns true if the page was successfully deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut page_table = self.state.page_table.lock();

        if let Some(frame_id) = page_table.remove(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];

            if frame.pin_count() > 0 {
                page_table.insert(page_id, frame_id);
                return Err(CrioError::PageStillPinned(page_id));
            }

            frame.reset();
            self.state.replacer.remove(frame_id);
            self.state.free_list.lock().push_back(frame_id);
            self.state.frame_available.notify_all();

            drop(page_table);

            self.disk_scheduler
                .disk_manager()
                .deallocate_page(page_id)?;

            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Fetches a page for read access.
    pub fn checked_read_page(&self, page_id: PageId) -> Result<Option<ReadPageGuard>> {
        if page_id == INVALID_PAGE_ID {
            return Err(CrioError::InvalidPageId(page_id));
        }

        let frame_id = self.fetch_page(page_id)?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let state = Arc::clone(&self.state);

        let guard = unsafe {
            ReadPageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| {
                    Self::release_frame(&state, pid, is_dirty);
                }),
            )
        };

        Ok(Some(guard))
    }

    /// Fetches a page for write access.
    pub fn checked_write_page(&self, page_id: PageId) -> Result<Option<WritePageGuard>> {
        if page_id == INVALID_PAGE_ID {
            return Err(CrioError::InvalidPageId(page_id));
        }

        let frame_id = self.fetch_page(page_id)?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let state = Arc::clone(&self.state);

        let guard = unsafe {
            WritePageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| {
                    Self::release_frame(&state, pid, is_dirty);
                }),
            )
        };

        Ok(Some(guard))
    }

    fn release_frame(state: &Arc<BufferPoolState>, page_id: PageId, is_dirty: bool) {
        let page_table = state.page_table.lock();
        if let Some(&frame_id) = page_table.get(&page_id) {
            let frame = &state.frames[frame_id.as_usize()];
            if is_dirty {
                frame.set_dirty(true);
            }
            if let Some(0) = frame.unpin() {
                state.replacer.set_evictable(frame_id, true);
                state.frame_available.notify_all();
            }
        }
    }

    /// Flushes a specific page to disk.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(CrioError::InvalidPageId(page_id));
        }

        let page_table = self.state.page_table.lock();

        if let Some(&frame_id) = page_table.get(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];

            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);

            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
            frame.set_dirty(false);

            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Flushes all dirty pages to disk, grouping contiguous page ids into a
    /// single disk write each so a run of dirty neighbors costs one I/O
    /// instead of many.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_table = self.state.page_table.lock();

        let mut dirty_pages: Vec<(PageId, FrameId)> = page_table
            .iter()
            .filter(|(_, &frame_id)| self.state.frames[frame_id.as_usize()].is_dirty())
            .map(|(&pid, &fid)| (pid, fid))
            .collect();

        if dirty_pages.is_empty() {
            return Ok(());
        }

        dirty_pages.sort_by_key(|(pid, _)| pid.as_i64());

        let mut i = 0;
        while i < dirty_pages.len() {
            let start_idx = i;

            while i + 1 < dirty_pages.len()
                && dirty_pages[i + 1].0.as_i64() == dirty_pages[i].0.as_i64() + 1
            {
                i += 1;
            }

            for (page_id, frame_id) in &dirty_pages[start_idx..=i] {
                let frame = &self.state.frames[frame_id.as_usize()];
                let mut data = [0u8; PAGE_SIZE];
                frame.copy_to(&mut data);
                self.disk_scheduler.schedule_write_sync(*page_id, &data)?;
                frame.set_dirty(false);
            }

            i += 1;
        }

        Ok(())
    }

    /// Returns the pin count for a page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let page_table = self.state.page_table.lock();

        page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    /// The disk manager backing this pool, for callers (such as the B+ tree)
    /// that need to inspect on-disk state directly, e.g. to tell a fresh
    /// database file from one being reopened.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.free_list.lock().len()
    }

    /// Fetches a page into the buffer pool and returns its frame ID, pinning
    /// it. If the page is already resident, returns its current frame.
    fn fetch_page(&self, page_id: PageId) -> Result<FrameId> {
        {
            let page_table = self.state.page_table.lock();
            if let Some(&frame_id) = page_table.get(&page_id) {
                let frame = &self.state.frames[frame_id.as_usize()];
                frame.pin();
                self.state.replacer.record_access(frame_id);
                self.state.replacer.set_evictable(frame_id, false);
                return Ok(frame_id);
            }
        }

        let frame_id = self.get_free_frame()?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        self.disk_scheduler.schedule_read_sync(page_id, &mut data)?;

        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.pin();

        self.state.page_table.lock().insert(page_id, frame_id);

        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);

        Ok(frame_id)
    }

    /// Gets a free frame, either from the free list or by evicting a page.
    /// In blocking mode, waits on a condvar until one becomes available
    /// instead of returning `BufferExhausted`.
    fn get_free_frame(&self) -> Result<FrameId> {
        loop {
            {
                let mut free_list = self.state.free_list.lock();
                if let Some(frame_id) = free_list.pop_front() {
                    return Ok(frame_id);
                }
            }

            // Evicting and, if the victim is dirty, flushing it happens with
            // the free list (and so the manager's condvar mutex) released:
            // the flush blocks on the disk response channel, and the manager
            // mutex must never be held while waiting on one.
            if let Some(frame_id) = self.state.replacer.evict() {
                let frame = &self.state.frames[frame_id.as_usize()];
                let old_page_id = frame.page_id();

                if frame.is_dirty() {
                    let mut data = [0u8; PAGE_SIZE];
                    frame.copy_to(&mut data);
                    self.disk_scheduler
                        .schedule_write_sync(old_page_id, &data)?;
                }

                self.state.page_table.lock().remove(&old_page_id);
                frame.reset();

                return Ok(frame_id);
            }

            if !self.blocking {
                return Err(CrioError::BufferExhausted);
            }

            let mut free_list = self.state.free_list.lock();
            // Re-check under the lock: a frame may have been freed or
            // marked evictable between the checks above and taking the lock.
            if let Some(frame_id) = free_list.pop_front() {
                return Ok(frame_id);
            }
            self.state.frame_available.wait(&mut free_list);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
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
    fn test_buffer_pool_manager_new_page() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();
        assert_eq!(page_id, PageId::new(0));
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        assert_eq!(bpm.free_frame_count(), 9);
    }

    #[test]
    fn test_buffer_pool_manager_read_write() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();

        {
            let mut guard = bpm.checked_write_page(page_id).unwrap().unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
        }

        assert_eq!(bpm.get_pin_count(page_id), Some(0));

        {
            let guard = bpm.checked_read_page(page_id).unwrap().unwrap();
            assert_eq!(guard.data()[0], 42);
            assert_eq!(guard.data()[100], 255);
        }
    }

    #[test]
    fn test_buffer_pool_manager_flush() {
        let (bpm, temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();

        {
            let mut guard = bpm.checked_write_page(page_id).unwrap().unwrap();
            guard.data_mut()[0] = 42;
        }

        bpm.flush_page(page_id).unwrap();

        drop(bpm);

        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm2 = BufferPoolManager::new(10, 2, dm);

        let guard = bpm2.checked_read_page(page_id).unwrap().unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_buffer_pool_manager_flush_all_contiguous() {
        let (bpm, temp) = create_bpm(10);

        let page_ids: Vec<_> = (0..4).map(|_| bpm.new_page().unwrap()).collect();
        for (i, &pid) in page_ids.iter().enumerate() {
            let mut guard = bpm.checked_write_page(pid).unwrap().unwrap();
            guard.data_mut()[0] = i as u8 + 1;
        }

        bpm.flush_all_pages().unwrap();
        drop(bpm);

        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm2 = BufferPoolManager::new(10, 2, dm);
        for (i, &pid) in page_ids.iter().enumerate() {
            let guard = bpm2.checked_read_page(pid).unwrap().unwrap();
            assert_eq!(guard.data()[0], i as u8 + 1);
        }
    }

    #[test]
    fn test_buffer_pool_manager_eviction() {
        let (bpm, _temp) = create_bpm(3);

        let page_ids: Vec<_> = (0..3).map(|_| bpm.new_page().unwrap()).collect();

        for &pid in &page_ids {
            let mut guard = bpm.checked_write_page(pid).unwrap().unwrap();
            guard.data_mut()[0] = pid.as_i64() as u8;
        }

        assert_eq!(bpm.free_frame_count(), 0);

        let new_page_id = bpm.new_page().unwrap();
        assert_eq!(new_page_id, PageId::new(3));
    }

    #[test]
    fn test_buffer_pool_manager_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();

        {
            let _guard = bpm.checked_read_page(page_id).unwrap().unwrap();
            assert!(bpm.delete_page(page_id).is_err());
        }

        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
    }

    #[test]
    fn test_buffer_pool_manager_non_blocking_errors_when_exhausted() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new_non_blocking(2, 2, dm);

        let page_id1 = bpm.new_page().unwrap();
        let page_id2 = bpm.new_page().unwrap();

        let _guard1 = bpm.checked_read_page(page_id1).unwrap().unwrap();
        let _guard2 = bpm.checked_read_page(page_id2).unwrap().unwrap();

        assert!(matches!(bpm.new_page(), Err(CrioError::BufferExhausted)));
    }

    #[test]
    fn test_buffer_pool_manager_blocking_waits_for_release() {
        let bpm = Arc::new({
            let temp_file = NamedTempFile::new().unwrap();
            let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
            BufferPoolManager::new(1, 2, dm)
        });

        let page_id = bpm.new_page().unwrap();
        let guard = bpm.checked_read_page(page_id).unwrap().unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let bpm_clone = Arc::clone(&bpm);
        let barrier_clone = Arc::clone(&barrier);

        let handle = thread::spawn(move || {
            barrier_clone.wait();
            // Only one frame exists and it's pinned; this blocks until the
            // main thread drops `guard` below.
            bpm_clone.new_page().unwrap()
        });

        barrier.wait();
        thread::sleep(std::time::Duration::from_millis(50));
        drop(guard);

        let new_page_id = handle.join().unwrap();
        assert_ne!(new_page_id, page_id);
    }
}
