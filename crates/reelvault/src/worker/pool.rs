use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};
use thiserror::Error;

use crate::coordinator::{ApprovalOutcome, Coordinator, CoordinatorError};

#[derive(Debug, Error)]
#[error("Approval pool channel closed")]
pub struct PoolClosed;

/// The outcome of one approval job.
pub struct ApprovalResult {
    pub id: i64,
    pub outcome: Result<ApprovalOutcome, CoordinatorError>,
}

/// Fans batch approvals out over worker threads. The coordinator's own
/// claim logic keeps any single entry on exactly one worker.
pub struct ApprovalPool {
    job_sender: Sender<i64>,
    result_receiver: Receiver<ApprovalResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl ApprovalPool {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(coordinator: Arc<Coordinator>, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (job_sender, job_receiver) = bounded::<i64>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<ApprovalResult>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let coordinator = Arc::clone(&coordinator);
            workers.push(thread::spawn(move || {
                run_worker(worker_id, job_rx, result_tx, shutdown_flag, coordinator);
            }));
        }

        info!("Started {} approval workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub fn submit(&self, id: i64) -> Result<(), PoolClosed> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(PoolClosed);
        }
        self.job_sender.send(id).map_err(|_| PoolClosed)
    }

    pub fn recv_result(&self) -> Option<ApprovalResult> {
        self.result_receiver.recv().ok()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Dropping the sender lets idle workers observe disconnection.
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Approval worker {} panicked: {:?}", i, e);
            } else {
                debug!("Approval worker {} finished", i);
            }
        }
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<i64>,
    result_sender: Sender<ApprovalResult>,
    shutdown: Arc<AtomicBool>,
    coordinator: Arc<Coordinator>,
) {
    debug!("Approval worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Approval worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(id) => {
                debug!("Approval worker {} processing entry {}", worker_id, id);
                let outcome = coordinator.approve(id);
                if result_sender.send(ApprovalResult { id, outcome }).is_err() {
                    error!("Approval worker {} result channel closed", worker_id);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Approval worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Approval worker {} stopped", worker_id);
}
