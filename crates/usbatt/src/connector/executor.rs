//! Worker pool running fire-and-forget command writes
//!
//! Workers are spawned on demand up to a fixed limit and exit after sitting
//! idle for the keep-alive period. Jobs travel over an unbounded channel.
//! A job accepted by [`CommandExecutor::submit`] is either run or discarded,
//! never dropped unseen.
use super::join_workers;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Unit of work accepted by the executor
pub(crate) trait Job: Send + 'static {
    /// Do the work
    fn run(self: Box<Self>);

    /// The executor shut down before the job could run
    fn discard(self: Box<Self>);
}

pub(crate) type BoxedJob = Box<dyn Job>;

/// Why a job was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitError {
    /// The executor has been shut down
    ShutDown,
    /// No worker could be started and none is running
    NoWorker,
}

#[derive(Default)]
struct PoolState {
    live: usize,
    idle: usize,
    spawned: usize,
    handles: Vec<JoinHandle<()>>,
}

struct Shared {
    receiver: Receiver<BoxedJob>,
    pool: Mutex<PoolState>,
    shutdown: AtomicBool,
    keep_alive: Duration,
}

impl Shared {
    fn work(self: Arc<Self>) {
        loop {
            self.pool.lock().idle += 1;
            let received = self.receiver.recv_timeout(self.keep_alive);

            let mut pool = self.pool.lock();
            pool.idle -= 1;
            match received {
                Ok(job) => {
                    drop(pool);
                    if self.shutdown.load(Ordering::SeqCst) {
                        job.discard();
                        continue;
                    }
                    job.run();
                }
                Err(RecvTimeoutError::Timeout) => {
                    // A job sent after the timeout still needs a worker
                    if self.receiver.is_empty() || self.shutdown.load(Ordering::SeqCst) {
                        pool.live -= 1;
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    pool.live -= 1;
                    return;
                }
            }
        }
    }
}

/// Bounded, lazily grown thread pool
pub(crate) struct CommandExecutor {
    sender: Mutex<Option<Sender<BoxedJob>>>,
    shared: Arc<Shared>,
    max_workers: usize,
}

impl CommandExecutor {
    pub fn new(max_workers: usize, keep_alive: Duration) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender: Mutex::new(Some(sender)),
            shared: Arc::new(Shared {
                receiver,
                pool: Mutex::new(PoolState::default()),
                shutdown: AtomicBool::new(false),
                keep_alive,
            }),
            max_workers: max_workers.max(1),
        }
    }

    /// Queue a job, starting a worker if none is idle and the limit allows.
    ///
    /// A job refused with [`SubmitError::ShutDown`] is dropped without being
    /// discarded; the caller reports that refusal itself. With
    /// [`SubmitError::NoWorker`] every queued job, this one included, has been
    /// discarded.
    pub fn submit(&self, job: BoxedJob) -> Result<(), SubmitError> {
        {
            let sender = self.sender.lock();
            let sender = sender.as_ref().ok_or(SubmitError::ShutDown)?;
            sender.send(job).map_err(|_| SubmitError::ShutDown)?;
        }

        let mut pool = self.shared.pool.lock();
        if pool.idle == 0 && pool.live < self.max_workers {
            pool.handles.retain(|handle| !handle.is_finished());
            match self.spawn_worker(pool.spawned) {
                Ok(handle) => {
                    pool.live += 1;
                    pool.spawned += 1;
                    pool.handles.push(handle);
                }
                Err(err) => {
                    warn!("Failed to start command worker: {}", err);
                    if pool.live == 0 {
                        drop(pool);
                        self.discard_queued();
                        return Err(SubmitError::NoWorker);
                    }
                }
            }
        }
        Ok(())
    }

    fn spawn_worker(&self, index: usize) -> io::Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(format!("usbatt-cmd-{}", index))
            .spawn(move || shared.work())
    }

    fn discard_queued(&self) -> usize {
        let mut discarded = 0;
        while let Ok(job) = self.shared.receiver.try_recv() {
            job.discard();
            discarded += 1;
        }
        discarded
    }

    /// Number of running workers
    #[cfg(test)]
    pub fn workers(&self) -> usize {
        self.shared.pool.lock().live
    }

    /// Reject new jobs, discard the ones not yet started and join the workers
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.sender.lock().take();

        let discarded = self.discard_queued();
        if discarded > 0 {
            debug!("Discarded {} pending command(s)", discarded);
        }

        let handles = std::mem::take(&mut self.shared.pool.lock().handles);
        join_workers(handles);
    }
}
