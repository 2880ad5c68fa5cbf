//! Background process driven by events and an optional periodic timeout
//!
//! The process shares no state with packet processing. It only logs what it
//! receives, and counts timeouts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};

use crate::error::Error;

pub const DEFAULT_PERIODIC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeriodicEvent {
    Event1(usize),
    Event2(usize),
    /// Turn periodic timeouts on or off
    EnableDisable(bool),
    Shutdown,
}

pub struct PeriodicProcess {
    sender: Sender<PeriodicEvent>,
    timeouts: Arc<AtomicUsize>,
    handler: Option<thread::JoinHandle<()>>,
}

impl PeriodicProcess {
    /// Spawn the process thread. Timeouts are initially disabled.
    ///
    /// Fails if `timeout` is zero.
    pub fn create(timeout: Duration) -> Result<Self, Error> {
        if timeout.is_zero() {
            return Err(Error::Config("periodic timeout must not be zero".to_owned()));
        }
        let (sender, receiver) = unbounded();
        let timeouts = Arc::new(AtomicUsize::new(0));
        let counter = timeouts.clone();
        let handler = thread::Builder::new()
            .name("inspect-periodic".to_owned())
            .spawn(move || {
                let start = Instant::now();
                let mut enabled = false;
                loop {
                    let event = if enabled {
                        match receiver.recv_timeout(timeout) {
                            Ok(event) => event,
                            Err(RecvTimeoutError::Timeout) => {
                                counter.fetch_add(1, Ordering::Relaxed);
                                warn!("timeout at {:.2}", start.elapsed().as_secs_f64());
                                continue;
                            }
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    } else {
                        match receiver.recv() {
                            Ok(event) => event,
                            Err(_) => break,
                        }
                    };
                    match event {
                        PeriodicEvent::Event1(_) => warn!("received event 1"),
                        PeriodicEvent::Event2(_) => warn!("received event 2"),
                        PeriodicEvent::EnableDisable(on) => {
                            warn!(
                                "Periodic timeouts now {}",
                                if on { "enabled" } else { "disabled" }
                            );
                            enabled = on;
                        }
                        PeriodicEvent::Shutdown => break,
                    }
                }
                debug!("periodic process exiting");
            })?;
        Ok(PeriodicProcess {
            sender,
            timeouts,
            handler: Some(handler),
        })
    }

    /// Post an event. Events sent after the process exited are discarded.
    pub fn signal(&self, event: PeriodicEvent) {
        if self.sender.send(event).is_err() {
            debug!("periodic process is gone, dropping {:?}", event);
        }
    }

    /// Number of timeouts handled so far
    pub fn timeouts(&self) -> usize {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Stop the process and wait for its thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handler) = self.handler.take() {
            let _ = self.sender.send(PeriodicEvent::Shutdown);
            if handler.join().is_err() {
                warn!("periodic process panicked");
            }
        }
    }
}

impl Drop for PeriodicProcess {
    fn drop(&mut self) {
        self.stop();
    }
}
