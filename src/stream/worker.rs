//! Frame processing thread
//!
//! The worker owns a dedicated thread that sleeps on a condition variable
//! until the handoff queue is non-empty or shutdown is requested, then drains
//! the queue: each record is converted (if configured) and emitted
//! synchronously to all subscribers before the next one is popped.
//!
//! # Shutdown
//!
//! Shutdown is both a flag and a wake signal. [`ProcessingWorker::shutdown`]
//! sets the flag, then waits for the thread's exit notification one poll
//! interval at a time, re-signalling the condition variable after every
//! interval. If the thread has not exited after the configured number of
//! attempts, [`StreamError::ShutdownTimeout`] is returned.

use crate::config::ShutdownPolicy;
use crate::error::{Result, StreamError};
use crate::stream::convert::FrameConversion;
use crate::stream::queue::HandoffQueue;
use crate::stream::stats::{FrameRateMeter, StreamCounters};
use crate::stream::subscriber::SubscriberRegistry;
use crate::types::FrameRecord;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

/// Name of the processing thread
pub const WORKER_THREAD_NAME: &str = "us-frame-processing";

/// A record waiting in the handoff queue, with the conversion chosen when it
/// was accepted
#[derive(Debug)]
pub struct QueuedFrame {
    pub record: FrameRecord,
    pub conversion: FrameConversion,
}

/// Wake-up condition shared by producer and worker
///
/// Notifiers take the mutex before signalling so a wake issued between the
/// worker's predicate check and its wait cannot be lost.
#[derive(Debug, Default)]
pub struct WakeSignal {
    lock: Mutex<()>,
    condvar: Condvar,
    shutdown: AtomicBool,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the worker
    pub fn notify(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.condvar.notify_one();
    }

    /// Set the shutdown flag and wake the worker
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Park until `ready` holds or shutdown is requested
    pub fn wait_until(&self, ready: impl Fn() -> bool) {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = self
            .condvar
            .wait_while(guard, |_| !ready() && !self.is_shutdown_requested())
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Handle to the processing thread
pub struct ProcessingWorker {
    handle: Option<JoinHandle<()>>,
    wake: Arc<WakeSignal>,
    exited: Receiver<()>,
}

impl ProcessingWorker {
    /// Spawn the processing thread
    pub fn spawn(
        queue: Arc<HandoffQueue<QueuedFrame>>,
        wake: Arc<WakeSignal>,
        subscribers: Arc<SubscriberRegistry>,
        counters: Arc<StreamCounters>,
    ) -> Result<Self> {
        let (exit_tx, exited) = bounded(1);
        let loop_state = WorkerLoop {
            queue,
            wake: wake.clone(),
            subscribers,
            counters,
            meter: FrameRateMeter::default(),
        };

        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || loop_state.run(exit_tx))?;

        Ok(Self {
            handle: Some(handle),
            wake,
            exited,
        })
    }

    /// Whether the thread is still alive
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the thread, re-signalling until it exits or the budget runs out
    pub fn shutdown(&mut self, policy: ShutdownPolicy) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        self.wake.request_shutdown();

        for attempt in 1..=policy.max_attempts {
            match self.exited.recv_timeout(policy.poll_interval()) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if handle.join().is_err() {
                        tracing::error!("Frame processing thread panicked during shutdown");
                    }
                    tracing::debug!("Frame processing thread joined after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::debug!(
                        "Frame processing thread still running (attempt {}/{}), re-signalling",
                        attempt,
                        policy.max_attempts
                    );
                    self.wake.notify();
                }
            }
        }

        tracing::error!(
            "Frame processing thread did not stop within {:?}",
            policy.budget()
        );
        self.handle = Some(handle);
        Err(StreamError::ShutdownTimeout {
            attempts: policy.max_attempts,
        })
    }
}

impl Drop for ProcessingWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Detach; the flag makes the thread exit after its current pass
            self.wake.request_shutdown();
        }
    }
}

struct WorkerLoop {
    queue: Arc<HandoffQueue<QueuedFrame>>,
    wake: Arc<WakeSignal>,
    subscribers: Arc<SubscriberRegistry>,
    counters: Arc<StreamCounters>,
    meter: FrameRateMeter,
}

impl WorkerLoop {
    fn run(mut self, exit_tx: Sender<()>) {
        tracing::info!("Frame processing thread started");

        loop {
            while let Some(queued) = self.queue.try_pop() {
                self.process(queued);
            }

            if self.wake.is_shutdown_requested() {
                break;
            }

            let queue = self.queue.clone();
            self.wake.wait_until(|| !queue.is_empty());
        }

        tracing::info!("Frame processing thread stopped");
        let _ = exit_tx.send(());
    }

    fn process(&mut self, queued: QueuedFrame) {
        let QueuedFrame {
            mut record,
            conversion,
        } = queued;

        if let Err(e) = conversion.apply(&mut record) {
            tracing::warn!("Dropping frame: {}", e);
            StreamCounters::incr(&self.counters.conversion_failures);
            return;
        }

        let failures = self.subscribers.emit_frame(&record);
        StreamCounters::incr(&self.counters.frames_emitted);
        if failures > 0 {
            StreamCounters::add(&self.counters.subscriber_failures, failures as u64);
        }

        let fps = self.meter.tick(Instant::now());
        self.counters.set_emitted_fps(fps);
        tracing::trace!(
            "Emitted frame {}x{} (device time {:?})",
            record.image.width(),
            record.image.height(),
            record.device_timestamp
        );
    }
}
