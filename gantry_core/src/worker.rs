//! Background worker that exclusively owns one `SensorPort`.
//!
//! Each request carries the tick sequence; replies are tagged with it so a
//! late answer from an earlier tick is never mistaken for the current one.
//!
//! Each `PortWorker` spawns exactly one thread, shut down and joined when the
//! worker is dropped.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;

use crate::error::SensorError;
use crate::port::SensorPort;
use crate::types::SensorValue;

/// How long an idle worker waits before re-checking the shutdown flag.
const IDLE_POLL: Duration = Duration::from_millis(50);

struct Reply {
    sequence: u64,
    result: Result<SensorValue, SensorError>,
}

pub struct PortWorker {
    id: String,
    bound: Duration,
    tx: Option<xch::Sender<u64>>,
    rx: xch::Receiver<Reply>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl PortWorker {
    /// Move an opened port onto its own thread.
    pub fn spawn(mut port: Box<dyn SensorPort>, timeout: Duration) -> Self {
        let id = port.id().to_string();
        let bound = port.read_bound(timeout);
        let (req_tx, req_rx) = xch::bounded::<u64>(1);
        let (rep_tx, rep_rx) = xch::unbounded::<Reply>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let thread_id = id.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!(sensor = %thread_id, "port worker received shutdown signal");
                    break;
                }
                match req_rx.recv_timeout(IDLE_POLL) {
                    Ok(sequence) => {
                        let result = port.read(timeout);
                        if rep_tx.send(Reply { sequence, result }).is_err() {
                            tracing::debug!(
                                sensor = %thread_id,
                                "port worker consumer disconnected"
                            );
                            break;
                        }
                    }
                    Err(xch::RecvTimeoutError::Timeout) => {}
                    Err(xch::RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::trace!(sensor = %thread_id, "port worker exiting cleanly");
        });

        Self {
            id,
            bound,
            tx: Some(req_tx),
            rx: rep_rx,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Longest a single read on this port may take.
    pub fn read_bound(&self) -> Duration {
        self.bound
    }

    /// Ask for one reading. Returns false if the worker is still busy with an
    /// earlier request or has exited.
    pub fn dispatch(&self, sequence: u64) -> bool {
        match &self.tx {
            Some(tx) => tx.try_send(sequence).is_ok(),
            None => false,
        }
    }

    /// Wait for the reply to `sequence`, discarding stale ones.
    pub fn collect(&self, sequence: u64, deadline: Instant) -> Result<SensorValue, SensorError> {
        loop {
            match self.rx.recv_deadline(deadline) {
                Ok(reply) if reply.sequence == sequence => return reply.result,
                Ok(reply) => {
                    tracing::debug!(
                        sensor = %self.id,
                        stale = reply.sequence,
                        sequence,
                        "discarding late reply"
                    );
                }
                Err(xch::RecvTimeoutError::Timeout) => return Err(SensorError::Timeout),
                Err(xch::RecvTimeoutError::Disconnected) => {
                    return Err(SensorError::DeviceBusy("port worker exited".into()));
                }
            }
        }
    }
}

impl Drop for PortWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Disconnect so an idle worker wakes immediately.
        self.tx.take();
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!(sensor = %self.id, "port worker joined"),
                Err(e) => {
                    tracing::warn!(sensor = %self.id, ?e, "port worker panicked during shutdown");
                }
            }
        }
    }
}
