//! Per-slot event inbox.
//!
//! Control threads and MIDI callbacks enqueue instrument events here; the
//! audio thread takes everything once per block. The lock is only held for
//! a push or for swapping vectors, never while plugin code runs.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::midi_engine::MidiEvent;
use super::state::NUM_SLOTS;

/// Events waiting for delivery, one FIFO per slot.
#[derive(Debug, Default)]
pub struct EventInbox {
    queues: Mutex<[Vec<MidiEvent>; NUM_SLOTS]>,
}

impl EventInbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> MutexGuard<'_, [Vec<MidiEvent>; NUM_SLOTS]> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an event to a slot's queue. Returns false for an invalid slot.
    pub fn enqueue(&self, slot: usize, event: MidiEvent) -> bool {
        if slot >= NUM_SLOTS {
            return false;
        }
        self.queues()[slot].push(event);
        true
    }

    /// Moves every queued event into `pending`, appending after anything
    /// already there, and leaves the inbox empty.
    ///
    /// `Vec::append` keeps the capacity of both sides, so once the vectors
    /// have grown the audio thread drains without allocating.
    pub fn drain_into(&self, pending: &mut [Vec<MidiEvent>; NUM_SLOTS]) {
        let mut queues = self.queues();
        for (queue, out) in queues.iter_mut().zip(pending.iter_mut()) {
            if !queue.is_empty() {
                out.append(queue);
            }
        }
    }

    /// Number of events waiting for a slot.
    pub fn pending(&self, slot: usize) -> usize {
        self.queues().get(slot).map_or(0, Vec::len)
    }

    /// Drops everything queued for a slot.
    pub fn clear_slot(&self, slot: usize) {
        if let Some(queue) = self.queues().get_mut(slot) {
            queue.clear();
        }
    }
}
