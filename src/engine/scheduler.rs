//! Deferred event delivery.
//!
//! Synthetic notes from the `note` command need their note-off a fixed time
//! later. One worker thread holds a timer heap; every scheduled event carries
//! the slot generation at scheduling time, and is dropped at fire time if the
//! slot has since been unloaded or replaced.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::inbox::EventInbox;
use super::midi_engine::MidiEvent;
use super::state::MixerState;

/// An event waiting for its due time.
#[derive(Debug, Clone, Copy)]
struct ScheduledEvent {
    due: Instant,
    /// Tie-breaker so equal deadlines fire in scheduling order.
    seq: u64,
    slot: usize,
    generation: u64,
    event: MidiEvent,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Delivers events to slot inboxes after a delay.
pub struct NoteScheduler {
    state: Arc<MixerState>,
    tx: Option<Sender<ScheduledEvent>>,
    worker: Option<JoinHandle<()>>,
    seq: AtomicU64,
}

impl NoteScheduler {
    /// Starts the worker thread.
    pub fn new(state: Arc<MixerState>, inbox: Arc<EventInbox>) -> Self {
        let (tx, rx) = unbounded();
        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name("slotmix-notes".into())
            .spawn(move || run(rx, worker_state, inbox));

        let (tx, worker) = match worker {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(e) => {
                log::error!("[Notes] Could not start scheduler thread: {}", e);
                (None, None)
            }
        };
        Self {
            state,
            tx,
            worker,
            seq: AtomicU64::new(0),
        }
    }

    /// Enqueues `event` for `slot` once `delay` has elapsed, unless the slot
    /// is unloaded or reloaded first. Returns false if the worker is gone or
    /// `delay` is too far in the future to represent.
    pub fn schedule_after(&self, delay: Duration, slot: usize, event: MidiEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        let Some(due) = Instant::now().checked_add(delay) else {
            log::warn!("[Notes] Delay {:?} out of range, event not scheduled", delay);
            return false;
        };
        let scheduled = ScheduledEvent {
            due,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            slot,
            generation: self.state.generation(slot),
            event,
        };
        tx.send(scheduled).is_ok()
    }
}

impl Drop for NoteScheduler {
    fn drop(&mut self) {
        // Disconnecting the channel ends the worker loop.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(rx: Receiver<ScheduledEvent>, state: Arc<MixerState>, inbox: Arc<EventInbox>) {
    let mut heap: BinaryHeap<Reverse<ScheduledEvent>> = BinaryHeap::new();
    loop {
        let received = match heap.peek() {
            Some(Reverse(next)) => {
                rx.recv_timeout(next.due.saturating_duration_since(Instant::now()))
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(scheduled) => heap.push(Reverse(scheduled)),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        while heap.peek().is_some_and(|Reverse(next)| next.due <= now) {
            let Some(Reverse(due)) = heap.pop() else {
                break;
            };
            if state.generation(due.slot) == due.generation {
                inbox.enqueue(due.slot, due.event);
            } else {
                log::debug!(
                    "[Notes] Dropped {:?} for slot {}: slot changed",
                    due.event,
                    due.slot + 1
                );
            }
        }
    }
    if !heap.is_empty() {
        log::debug!("[Notes] Discarded {} pending event(s) at shutdown", heap.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::tests::Dummy;
    use crate::engine::state::ChannelSlot;
    use crate::dsp::PluginKind;

    fn setup() -> (Arc<MixerState>, Arc<EventInbox>, NoteScheduler) {
        let state = Arc::new(MixerState::new());
        let inbox = Arc::new(EventInbox::new());
        let plugin = Dummy::shared("test:synth", PluginKind::Instrument);
        state.install_slot(0, ChannelSlot::new("s", plugin)).unwrap();
        let scheduler = NoteScheduler::new(Arc::clone(&state), Arc::clone(&inbox));
        (state, inbox, scheduler)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_event_fires_after_delay() {
        let (_state, inbox, scheduler) = setup();
        assert!(scheduler.schedule_after(Duration::from_millis(20), 0, MidiEvent::note_off(60)));
        assert_eq!(inbox.pending(0), 0);
        assert!(wait_for(|| inbox.pending(0) == 1));
    }

    #[test]
    fn test_unrepresentable_delay_is_refused() {
        let (_state, inbox, scheduler) = setup();
        assert!(!scheduler.schedule_after(Duration::MAX, 0, MidiEvent::note_off(60)));
        assert_eq!(inbox.pending(0), 0);
    }

    #[test]
    fn test_events_fire_in_due_order() {
        let (_state, inbox, scheduler) = setup();
        scheduler.schedule_after(Duration::from_millis(60), 0, MidiEvent::note_off(62));
        scheduler.schedule_after(Duration::from_millis(10), 0, MidiEvent::note_off(61));
        assert!(wait_for(|| inbox.pending(0) == 2));

        let mut pending: [Vec<MidiEvent>; crate::engine::state::NUM_SLOTS] = Default::default();
        inbox.drain_into(&mut pending);
        assert_eq!(
            pending[0],
            vec![MidiEvent::note_off(61), MidiEvent::note_off(62)]
        );
    }

    #[test]
    fn test_unload_cancels_pending_event() {
        let (state, inbox, scheduler) = setup();
        scheduler.schedule_after(Duration::from_millis(40), 0, MidiEvent::note_off(60));
        state.clear_slot(0).unwrap();
        thread::sleep(Duration::from_millis(120));
        assert_eq!(inbox.pending(0), 0);
    }

    #[test]
    fn test_drop_joins_worker() {
        let (_state, _inbox, scheduler) = setup();
        scheduler.schedule_after(Duration::from_secs(60), 0, MidiEvent::note_off(60));
        drop(scheduler);
    }
}
