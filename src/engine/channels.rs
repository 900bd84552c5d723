//! Render fault reporting.
//!
//! The audio thread may not log or allocate, so per-slot failures are pushed
//! into an rtrb ring buffer instead. A monitor thread on the control side
//! drains the ring, coalesces repeats and logs them.

use std::collections::BTreeMap;
use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use rtrb::{Consumer, Producer, RingBuffer};

/// Default capacity of the fault ring.
pub const DEFAULT_FAULT_BUFFER_SIZE: usize = 256;

/// How often the monitor drains the ring.
pub const FAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// What went wrong while rendering a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FaultKind {
    /// The plugin was locked by a control command; the slot was silent.
    Busy,
    /// The instrument refused an event.
    EventRejected,
    /// The instrument failed to render.
    Render,
    /// An insert effect failed (0-based position).
    Effect { index: usize },
    /// A master effect failed (0-based position).
    MasterEffect { index: usize },
}

/// One failure reported by the audio thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RenderFault {
    /// Slot index (0-based), or `None` for the master bus.
    pub slot: Option<usize>,
    pub kind: FaultKind,
}

impl RenderFault {
    pub fn slot(slot: usize, kind: FaultKind) -> Self {
        Self {
            slot: Some(slot),
            kind,
        }
    }

    pub fn master(index: usize) -> Self {
        Self {
            slot: None,
            kind: FaultKind::MasterEffect { index },
        }
    }
}

impl fmt::Display for RenderFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            Some(slot) => write!(f, "slot {}: ", slot + 1)?,
            None => write!(f, "master: ")?,
        }
        match self.kind {
            FaultKind::Busy => write!(f, "plugin busy, block skipped"),
            FaultKind::EventRejected => write!(f, "instrument rejected an event"),
            FaultKind::Render => write!(f, "instrument render failed, slot silenced"),
            FaultKind::Effect { index } => {
                write!(f, "fx[{}] failed, slot silenced", index + 1)
            }
            FaultKind::MasterEffect { index } => {
                write!(f, "fx[{}] failed, master silenced", index + 1)
            }
        }
    }
}

/// Creates a fault ring with the given capacity.
pub fn fault_channel(capacity: usize) -> (FaultSender, FaultReceiver) {
    let (tx, rx) = RingBuffer::new(capacity);
    (FaultSender { tx }, FaultReceiver { rx })
}

/// Audio-thread side of the fault ring.
///
/// REAL-TIME SAFE: pushing never blocks or allocates.
pub struct FaultSender {
    tx: Producer<RenderFault>,
}

impl FaultSender {
    /// Reports a fault, dropping it if the ring is full.
    #[inline]
    pub fn send_lossy(&mut self, fault: RenderFault) {
        let _ = self.tx.push(fault);
    }
}

/// Control-side end of the fault ring.
pub struct FaultReceiver {
    rx: Consumer<RenderFault>,
}

impl FaultReceiver {
    /// Takes every fault currently queued.
    pub fn drain(&mut self) -> impl Iterator<Item = RenderFault> + '_ {
        std::iter::from_fn(|| self.rx.pop().ok())
    }

    /// Drains the ring and counts identical faults.
    pub fn coalesce(&mut self) -> BTreeMap<RenderFault, usize> {
        let mut counts = BTreeMap::new();
        for fault in self.drain() {
            *counts.entry(fault).or_insert(0) += 1;
        }
        counts
    }
}

/// Background thread that logs faults reported by the audio thread.
pub struct FaultMonitor {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl FaultMonitor {
    /// Starts polling `receiver` on a new thread.
    pub fn spawn(mut receiver: FaultReceiver) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("slotmix-faults".into())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(FAULT_POLL_INTERVAL) {
                    report(receiver.coalesce());
                }
                report(receiver.coalesce());
            });

        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("[Audio] Could not start fault monitor: {}", e);
                None
            }
        };
        Self {
            stop_tx: Some(stop_tx),
            thread,
        }
    }

    /// Stops the monitor after a final drain.
    pub fn stop(&mut self) {
        // Dropping the sender wakes the thread.
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FaultMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn report(counts: BTreeMap<RenderFault, usize>) {
    for (fault, count) in counts {
        // Busy slots are expected while a command holds a plugin.
        if fault.kind == FaultKind::Busy {
            log::debug!("[Audio] {} ({}x)", fault, count);
        } else if count > 1 {
            log::warn!("[Audio] {} ({}x)", fault, count);
        } else {
            log::warn!("[Audio] {}", fault);
        }
    }
}
