use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::common::{CairnError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// Direction of a disk request
enum RequestKind {
    Read,
    Write,
}

/// A single queued disk I/O request.
///
/// `data` points at a PAGE_SIZE buffer the caller keeps alive until the
/// completion signal arrives: the worker reads from it for writes and
/// writes into it for reads.
struct DiskRequest {
    kind: RequestKind,
    page_id: PageId,
    data: *mut u8,
    completion: std::sync::mpsc::Sender<bool>,
}

// Safety: the request is consumed by the single worker thread, and the
// synchronous wrappers block until the completion arrives, keeping the
// buffer valid for the worker's whole use of it.
unsafe impl Send for DiskRequest {}

/// DiskScheduler funnels page I/O through a background worker thread fed by
/// a bounded queue.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a scheduler and spawns its worker thread.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(64);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm = Arc::clone(&disk_manager);
        let stop = Arc::clone(&shutdown);
        let worker_handle = thread::spawn(move || Self::worker_loop(dm, receiver, stop));

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            worker_handle: Some(worker_handle),
        }
    }

    /// Schedules a read and blocks until it completes.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = std::sync::mpsc::channel();
        self.submit(DiskRequest {
            kind: RequestKind::Read,
            page_id,
            data: data.as_mut_ptr(),
            completion: tx,
        })?;
        Self::await_completion(rx, page_id)
    }

    /// Schedules a write and blocks until it completes.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = std::sync::mpsc::channel();
        // The worker only reads through the pointer for a write request.
        self.submit(DiskRequest {
            kind: RequestKind::Write,
            page_id,
            data: data.as_ptr() as *mut u8,
            completion: tx,
        })?;
        Self::await_completion(rx, page_id)
    }

    fn submit(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| CairnError::DiskScheduler(format!("failed to queue request: {}", e)))
    }

    fn await_completion(rx: std::sync::mpsc::Receiver<bool>, page_id: PageId) -> Result<()> {
        let ok = rx
            .recv()
            .map_err(|e| CairnError::DiskScheduler(format!("completion lost: {}", e)))?;
        if ok {
            Ok(())
        } else {
            Err(CairnError::DiskScheduler(format!(
                "I/O failed for {}",
                page_id
            )))
        }
    }

    fn worker_loop(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain what is already queued before exiting.
                while let Ok(request) = receiver.try_recv() {
                    Self::process(&disk_manager, request);
                }
                break;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::process(&disk_manager, request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process(disk_manager: &DiskManager, request: DiskRequest) {
        let ok = match request.kind {
            RequestKind::Write => {
                // Safety: the submitting thread keeps the buffer alive until
                // the completion is delivered below.
                let data = unsafe { std::slice::from_raw_parts(request.data, PAGE_SIZE) };
                disk_manager.write_page(request.page_id, data).is_ok()
            }
            RequestKind::Read => {
                // Safety: as above, and the buffer is exclusively ours.
                let data = unsafe { std::slice::from_raw_parts_mut(request.data, PAGE_SIZE) };
                disk_manager.read_page(request.page_id, data).is_ok()
            }
        };

        let _ = request.completion.send(ok);
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker_handle.take() {
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
    fn test_disk_scheduler_interleaved_requests() {
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
}
