//! Sequencer input.
//!
//! Messages from a hardware sequencer (or anything connected to the virtual
//! port) are routed by channel to slot inboxes. Channels without a route are
//! dropped.

use std::sync::Arc;

use crate::engine::{EventInbox, MidiBackend, MidiConnection, MidiError, MidiEvent, MixerState};

/// Name of the virtual port created when no hardware port is given.
pub const VIRTUAL_PORT_NAME: &str = "slotmix-seq";

/// Connection label for the sequencer input.
const LABEL: &str = "slotmix-seq-in";

/// Routes one raw message. Returns the slot it was queued for.
pub fn dispatch_raw(state: &MixerState, inbox: &EventInbox, bytes: &[u8]) -> Option<usize> {
    let event = MidiEvent::from_bytes(bytes)?;
    let slot = state.lookup_route(event.channel())?;
    inbox.enqueue(slot, event).then_some(slot)
}

/// An open sequencer input port.
#[derive(Debug)]
pub struct SequencerInput {
    connection: MidiConnection,
}

impl SequencerInput {
    /// Opens hardware port `port`, or a virtual port when `port` is `None`.
    pub fn open(
        backend: &MidiBackend,
        port: Option<usize>,
        state: Arc<MixerState>,
        inbox: Arc<EventInbox>,
    ) -> Result<Self, MidiError> {
        let callback = move |bytes: &[u8]| {
            dispatch_raw(&state, &inbox, bytes);
        };
        let connection = match port {
            Some(index) => backend.open(index, LABEL, callback)?,
            None => backend.open_virtual(VIRTUAL_PORT_NAME, callback)?,
        };
        Ok(Self { connection })
    }

    pub fn name(&self) -> &str {
        self.connection.name()
    }

    pub fn close(self) {
        self.connection.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::PluginKind;
    use crate::engine::state::tests::Dummy;
    use crate::engine::ChannelSlot;

    fn setup() -> (MixerState, EventInbox) {
        let state = MixerState::new();
        state
            .install_slot(0, ChannelSlot::new("a", Dummy::shared("test:a", PluginKind::Instrument)))
            .unwrap();
        (state, EventInbox::new())
    }

    #[test]
    fn test_routed_channel_reaches_slot() {
        let (state, inbox) = setup();
        // Channel 5 on the wire is 4 internally.
        state.route(4, 0).unwrap();
        assert_eq!(dispatch_raw(&state, &inbox, &[0x94, 60, 100]), Some(0));
        assert_eq!(inbox.pending(0), 1);
    }

    #[test]
    fn test_unrouted_channel_ignored() {
        let (state, inbox) = setup();
        assert_eq!(dispatch_raw(&state, &inbox, &[0x90, 60, 100]), None);
        assert_eq!(inbox.pending(0), 0);
    }

    #[test]
    fn test_system_and_truncated_messages_ignored() {
        let (state, inbox) = setup();
        state.route(0, 0).unwrap();
        assert_eq!(dispatch_raw(&state, &inbox, &[0xF8]), None);
        assert_eq!(dispatch_raw(&state, &inbox, &[0x90, 60]), None);
        assert_eq!(dispatch_raw(&state, &inbox, &[]), None);
    }

    #[test]
    fn test_route_to_empty_slot_still_queues() {
        let (state, inbox) = setup();
        state.route(2, 5).unwrap();
        assert_eq!(dispatch_raw(&state, &inbox, &[0xB2, 1, 64]), Some(5));
        assert_eq!(inbox.pending(5), 1);
    }

    #[test]
    fn test_events_keep_order() {
        let (state, inbox) = setup();
        state.route(0, 0).unwrap();
        dispatch_raw(&state, &inbox, &[0x90, 60, 100]);
        dispatch_raw(&state, &inbox, &[0x80, 60, 0]);

        let mut pending: [Vec<MidiEvent>; crate::engine::NUM_SLOTS] = Default::default();
        inbox.drain_into(&mut pending);
        assert!(matches!(pending[0][0], MidiEvent::NoteOn { note: 60, .. }));
        assert!(matches!(pending[0][1], MidiEvent::NoteOff { note: 60, .. }));
    }
}
