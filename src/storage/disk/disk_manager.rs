use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{CrioError, PageId, Result, PAGE_SIZE};

/// DiskManager reads and writes fixed-size pages to a single backing file.
///
/// Page ids double as slot indices: page `p` lives at byte offset
/// `p * PAGE_SIZE`. Deleted pages are pushed onto a free-slot list and
/// handed back out by `allocate_page` before the file is grown further.
pub struct DiskManager {
    file: Mutex<File>,
    /// One past the highest slot ever handed out by linear growth.
    next_page_id: AtomicI64,
    /// Current file capacity, in pages.
    capacity: AtomicU64,
    /// Reclaimed page ids available for reuse.
    free_slots: Mutex<Vec<PageId>>,
    num_reads: AtomicU64,
    num_writes: AtomicU64,
}

impl DiskManager {
    /// Opens (or creates) the database file at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;

        let file_size = file.metadata()?.len();
        let capacity_pages = file_size / PAGE_SIZE as u64;

        Ok(Self {
            file: Mutex::new(file),
            next_page_id: AtomicI64::new(capacity_pages as i64),
            capacity: AtomicU64::new(capacity_pages),
            free_slots: Mutex::new(Vec::new()),
            num_reads: AtomicU64::new(0),
            num_writes: AtomicU64::new(0),
        })
    }

    /// Reads a page from disk into `data`, which must be exactly `PAGE_SIZE`
    /// bytes. A page that was allocated but never written reads back as
    /// zeros (the backing file is grown with holes, not explicit zero
    /// writes).
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");

        if page_id.as_i64() < 0 {
            return Err(CrioError::InvalidPageId(page_id));
        }

        let byte_offset = page_id.as_i64() as u64 * PAGE_SIZE as u64;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;

        let bytes_read = file.read(data)?;
        if bytes_read < PAGE_SIZE {
            data[bytes_read..].fill(0);
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes `data` (exactly `PAGE_SIZE` bytes) to `page_id`'s slot.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");

        if page_id.as_i64() < 0 {
            return Err(CrioError::InvalidPageId(page_id));
        }

        self.ensure_capacity(page_id.as_i64() as u64 + 1)?;

        let byte_offset = page_id.as_i64() as u64 * PAGE_SIZE as u64;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a new page, reusing a deleted slot if one is free,
    /// otherwise growing the file. The page is zero-filled on disk.
    pub fn allocate_page(&self) -> Result<PageId> {
        let reused = self.free_slots.lock().pop();

        let page_id = match reused {
            Some(page_id) => page_id,
            None => PageId::new(self.next_page_id.fetch_add(1, Ordering::SeqCst)),
        };

        let zeros = [0u8; PAGE_SIZE];
        self.write_page(page_id, &zeros)?;

        Ok(page_id)
    }

    /// Reclaims `page_id`'s slot for future allocation and zeroes it on
    /// disk.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let zeros = [0u8; PAGE_SIZE];
        self.write_page(page_id, &zeros)?;
        self.free_slots.lock().push(page_id);
        Ok(())
    }

    /// Grows the backing file so that it can hold at least `required_pages`
    /// pages. Growth is geometric (capacity doubles) so that a long run of
    /// allocations does not call `set_len` on every single one.
    fn ensure_capacity(&self, required_pages: u64) -> Result<()> {
        let current = self.capacity.load(Ordering::Acquire);
        if required_pages <= current {
            return Ok(());
        }

        let mut new_capacity = current.max(1);
        while new_capacity < required_pages {
            new_capacity *= 2;
        }

        let file = self.file.lock();
        file.set_len(new_capacity * PAGE_SIZE as u64)?;
        self.capacity.store(new_capacity, Ordering::Release);
        Ok(())
    }

    /// Number of pages ever allocated via linear growth (ignores reclaimed
    /// slots sitting on the free list).
    pub fn num_pages(&self) -> i64 {
        self.next_page_id.load(Ordering::Relaxed)
    }

    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn sync(&self) -> Result<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let file = self.file.get_mut();
        let _ = file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_manager_new_empty_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let dm = DiskManager::new(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(dm.num_pages(), 0);
    }

    #[test]
    fn test_disk_manager_allocate_page() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("alloc.db");
        let dm = DiskManager::new(&db_path).unwrap();

        let page_id = dm.allocate_page().unwrap();
        assert_eq!(page_id, PageId::new(0));

        let page_id2 = dm.allocate_page().unwrap();
        assert_eq!(page_id2, PageId::new(1));
    }

    #[test]
    fn test_disk_manager_read_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("rw.db");
        let dm = DiskManager::new(&db_path).unwrap();

        let page_id = dm.allocate_page().unwrap();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        write_data[PAGE_SIZE - 1] = 128;
        dm.write_page(page_id, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut read_data).unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
        assert_eq!(read_data[PAGE_SIZE - 1], 128);
    }

    #[test]
    fn test_disk_manager_persistence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("persist.db");

        {
            let dm = DiskManager::new(&db_path).unwrap();
            let page_id = dm.allocate_page().unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 123;
            dm.write_page(page_id, &data).unwrap();
        }

        {
            let dm = DiskManager::new(&db_path).unwrap();
            assert_eq!(dm.num_pages(), 1);

            let mut data = [0u8; PAGE_SIZE];
            dm.read_page(PageId::new(0), &mut data).unwrap();
            assert_eq!(data[0], 123);
        }
    }

    #[test]
    fn test_disk_manager_reuses_freed_slot() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("free.db");
        let dm = DiskManager::new(&db_path).unwrap();

        let p0 = dm.allocate_page().unwrap();
        let p1 = dm.allocate_page().unwrap();
        dm.deallocate_page(p0).unwrap();

        let p2 = dm.allocate_page().unwrap();
        assert_eq!(p2, p0);

        let p3 = dm.allocate_page().unwrap();
        assert_ne!(p3, p1);
    }

    #[test]
    fn test_disk_manager_unwritten_page_reads_zero() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("zero.db");
        let dm = DiskManager::new(&db_path).unwrap();

        let page_id = dm.allocate_page().unwrap();
        let mut data = [0xffu8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }
}
