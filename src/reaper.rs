//! Background eviction of resources that sat idle too long

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::manager::ManageResource;
use crate::queue::BoundedResourceQueue;

/// Handle to a pool's reaper thread.
///
/// The thread wakes every `frequency`, evicts idle resources older than
/// `idle_timeout` and goes back to sleep. Dropping the handle stops the thread
/// and waits for it to finish its current sweep.
pub struct IdleReaper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    frequency: Duration,
    idle_timeout: Duration,
}

impl IdleReaper {
    pub(crate) fn spawn<M: ManageResource>(
        queue: Arc<BoundedResourceQueue<M>>,
        frequency: Duration,
        idle_timeout: Duration,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("respool-reaper".to_string())
            .spawn(move || {
                tracing::info!(?frequency, ?idle_timeout, "idle reaper started");
                loop {
                    match stop_rx.recv_timeout(frequency) {
                        Err(RecvTimeoutError::Timeout) => {
                            queue.reap_idle(idle_timeout);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::info!("idle reaper stopped");
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
            frequency,
            idle_timeout,
        })
    }

    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("idle reaper thread panicked");
        }
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
