use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::common::{CrioError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// Represents a disk I/O request
pub struct DiskRequest {
    /// Whether this is a write (true) or read (false) request
    pub is_write: bool,
    /// The page ID to read/write
    pub page_id: PageId,
    /// Pointer to the data buffer (must be PAGE_SIZE bytes)
    /// For reads: data will be written here
    /// For writes: data will be read from here
    pub data: *mut u8,
    /// Promise to signal completion
    pub callback: Option<std::sync::mpsc::Sender<bool>>,
}

// Safety: DiskRequest only ever travels between the submitting thread and the
// worker that serves its page; the caller keeps the pointed-to buffer alive
// until the completion channel fires.
unsafe impl Send for DiskRequest {}

impl DiskRequest {
    pub fn read(page_id: PageId, data: *mut u8) -> Self {
        Self {
            is_write: false,
            page_id,
            data,
            callback: None,
        }
    }

    pub fn write(page_id: PageId, data: *mut u8) -> Self {
        Self {
            is_write: true,
            page_id,
            data,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: std::sync::mpsc::Sender<bool>) -> Self {
        self.callback = Some(callback);
        self
    }
}

type WorkerMap = Arc<Mutex<HashMap<PageId, Sender<DiskRequest>>>>;

/// DiskScheduler provides asynchronous disk access. Requests for the same
/// page are served in FIFO order by a worker thread dedicated to that page;
/// requests for different pages run concurrently.
///
/// A dispatcher thread reads the submission queue and routes each request
/// into its page's queue, spawning a worker the first time a page is seen.
/// A worker exits once its queue runs dry; because the dispatcher only ever
/// inserts into / sends through the worker map while holding its lock, and a
/// worker only removes itself from that map after re-checking its queue
/// under the same lock, no request can be routed to a channel whose reader
/// has already gone away.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    dispatcher_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));
        let workers: WorkerMap = Arc::new(Mutex::new(HashMap::new()));

        let dm_clone = Arc::clone(&disk_manager);
        let shutdown_clone = Arc::clone(&shutdown);

        let dispatcher_handle = thread::spawn(move || {
            Self::run_dispatcher(dm_clone, receiver, shutdown_clone, workers);
        });

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            dispatcher_handle: Some(dispatcher_handle),
        }
    }

    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| CrioError::DiskScheduler(format!("failed to schedule request: {}", e)))
    }

    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = std::sync::mpsc::channel();
        let request = DiskRequest::read(page_id, data.as_mut_ptr()).with_callback(tx);

        self.schedule(request)?;

        rx.recv()
            .map_err(|e| CrioError::DiskScheduler(format!("failed to receive completion: {}", e)))?;

        Ok(())
    }

    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = std::sync::mpsc::channel();
        // Safety: the worker only reads from this pointer for a write request.
        let request = DiskRequest::write(page_id, data.as_ptr() as *mut u8).with_callback(tx);

        self.schedule(request)?;

        rx.recv()
            .map_err(|e| CrioError::DiskScheduler(format!("failed to receive completion: {}", e)))?;

        Ok(())
    }

    /// Reads the submission queue and routes each request to its page's
    /// worker, spawning one on first sight of that page id.
    fn run_dispatcher(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
        workers: WorkerMap,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                while let Ok(request) = receiver.try_recv() {
                    Self::dispatch(&disk_manager, &workers, request);
                }
                break;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::dispatch(&disk_manager, &workers, request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // Let any still-running workers drain their queues naturally; we do
        // not block shutdown on them since they self-terminate once empty.
    }

    fn dispatch(disk_manager: &Arc<DiskManager>, workers: &WorkerMap, request: DiskRequest) {
        let page_id = request.page_id;
        let mut workers_guard = workers.lock();

        if let Some(sender) = workers_guard.get(&page_id) {
            // Worker is still alive: by construction it cannot have removed
            // itself from the map without holding this same lock, so the
            // channel it owns is still being drained.
            let _ = sender.send(request);
            return;
        }

        let (tx, rx) = unbounded::<DiskRequest>();
        let _ = tx.send(request);

        let dm = Arc::clone(disk_manager);
        let workers_for_worker = Arc::clone(workers);
        thread::spawn(move || Self::run_page_worker(page_id, dm, rx, workers_for_worker));

        workers_guard.insert(page_id, tx);
    }

    /// Drains `receiver` in FIFO order until the queue is observed empty,
    /// then removes its own entry from `workers` and exits.
    fn run_page_worker(
        page_id: PageId,
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        workers: WorkerMap,
    ) {
        loop {
            match receiver.try_recv() {
                Ok(request) => {
                    Self::process_request(&disk_manager, request);
                }
                Err(TryRecvError::Empty) => {
                    let mut workers_guard = workers.lock();
                    // Re-check under the lock: a dispatch racing us would
                    // have sent while holding this same lock.
                    match receiver.try_recv() {
                        Ok(request) => {
                            drop(workers_guard);
                            Self::process_request(&disk_manager, request);
                        }
                        Err(_) => {
                            workers_guard.remove(&page_id);
                            return;
                        }
                    }
                }
                Err(TryRecvError::Disconnected) => return,
            }
        }
    }

    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        let success = if request.is_write {
            // Safety: caller ensures the pointer is valid for PAGE_SIZE bytes.
            let data = unsafe { std::slice::from_raw_parts(request.data, PAGE_SIZE) };
            disk_manager.write_page(request.page_id, data).is_ok()
        } else {
            // Safety: caller ensures the pointer is valid for PAGE_SIZE bytes.
            let data = unsafe { std::slice::from_raw_parts_mut(request.data, PAGE_SIZE) };
            disk_manager.read_page(request.page_id, data).is_ok()
        };

        if let Some(callback) = request.callback {
            let _ = callback.send(success);
        }
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.dispatcher_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_disk_scheduler_read_write() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let page_id = scheduler.disk_manager().allocate_page().unwrap();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        scheduler.schedule_write_sync(page_id, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        scheduler
            .schedule_read_sync(page_id, &mut read_data)
            .unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
    }

    #[test]
    fn test_disk_scheduler_multiple_pages_concurrent() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let page_id1 = scheduler.disk_manager().allocate_page().unwrap();
        let page_id2 = scheduler.disk_manager().allocate_page().unwrap();

        let data1 = [1u8; PAGE_SIZE];
        let data2 = [2u8; PAGE_SIZE];

        scheduler.schedule_write_sync(page_id1, &data1).unwrap();
        scheduler.schedule_write_sync(page_id2, &data2).unwrap();

        let mut read1 = [0u8; PAGE_SIZE];
        let mut read2 = [0u8; PAGE_SIZE];

        scheduler.schedule_read_sync(page_id1, &mut read1).unwrap();
        scheduler.schedule_read_sync(page_id2, &mut read2).unwrap();

        assert_eq!(read1[0], 1);
        assert_eq!(read2[0], 2);
    }

    #[test]
    fn test_disk_scheduler_fifo_per_page() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let page_id = scheduler.disk_manager().allocate_page().unwrap();

        // Writes to the same page, issued back to back, must land in order:
        // the last write's value should be the one a subsequent read sees.
        for v in 0..10u8 {
            let data = [v; PAGE_SIZE];
            scheduler.schedule_write_sync(page_id, &data).unwrap();
        }

        let mut read_data = [0u8; PAGE_SIZE];
        scheduler
            .schedule_read_sync(page_id, &mut read_data)
            .unwrap();
        assert_eq!(read_data[0], 9);
    }

    #[test]
    fn test_disk_scheduler_worker_respawns_after_idle() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let page_id = scheduler.disk_manager().allocate_page().unwrap();

        let mut data = [7u8; PAGE_SIZE];
        scheduler.schedule_write_sync(page_id, &data).unwrap();

        // Give the worker time to see its queue empty and exit.
        thread::sleep(Duration::from_millis(50));

        scheduler.schedule_read_sync(page_id, &mut data).unwrap();
        assert_eq!(data[0], 7);
    }
}
