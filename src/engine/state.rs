//! Shared mixer state.
//!
//! Slots, the master bus and the routing table live in one immutable
//! [`MixTable`] published through an [`ArcSwap`]. The audio thread loads the
//! current table without locking. Every mutation goes through a method on
//! [`MixerState`], which clones the table under a writer lock, applies the
//! change and publishes the result, so readers never observe a half-applied
//! command.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::{ArcSwap, Guard};

use super::routing::RoutingTable;
use crate::dsp::SharedPlugin;

/// Number of channel slots.
pub const NUM_SLOTS: usize = 8;

/// Gain a freshly loaded slot starts with.
pub const DEFAULT_SLOT_GAIN: f32 = 0.8;

/// Master gain at startup.
pub const DEFAULT_MASTER_GAIN: f32 = 1.0;

/// Validation errors for mixer state mutations. Nothing changes when one is returned.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("slot must be 1-8")]
    InvalidSlot,
    #[error("MIDI channel must be 1-16")]
    InvalidChannel,
    /// Holds the 0-based index; displayed 1-based.
    #[error("Slot {} is empty", .0 + 1)]
    EmptySlot(usize),
    #[error("fx_index out of range")]
    InvalidEffect,
}

/// One channel strip: an instrument, its insert effects and mix settings.
#[derive(Clone, Debug)]
pub struct ChannelSlot {
    /// Display name.
    pub name: String,
    /// Path the instrument was loaded from.
    pub source_path: String,
    /// The instrument plugin.
    pub instrument: SharedPlugin,
    /// Insert effects, applied in order.
    pub effects: Vec<SharedPlugin>,
    /// Linear gain. Not clamped here; only the final mix is clamped.
    pub gain: f32,
    pub muted: bool,
    pub solo: bool,
    /// Channels the routing table sends to this slot.
    pub routed_channels: BTreeSet<u8>,
}

impl ChannelSlot {
    /// Creates a slot with default mix settings and no effects.
    pub fn new(name: impl Into<String>, instrument: SharedPlugin) -> Self {
        Self {
            name: name.into(),
            source_path: instrument.path().to_string(),
            instrument,
            effects: Vec::new(),
            gain: DEFAULT_SLOT_GAIN,
            muted: false,
            solo: false,
            routed_channels: BTreeSet::new(),
        }
    }

    /// Whether this slot contributes to the mix. Mute always wins over solo.
    #[inline]
    pub fn is_audible(&self, any_solo: bool) -> bool {
        !self.muted && (!any_solo || self.solo)
    }
}

/// The single mix point after all slots are summed.
#[derive(Clone, Debug)]
pub struct MasterBus {
    /// Effects applied to the summed mix, in order.
    pub effects: Vec<SharedPlugin>,
    /// Linear output gain.
    pub gain: f32,
}

impl Default for MasterBus {
    fn default() -> Self {
        Self {
            effects: Vec::new(),
            gain: DEFAULT_MASTER_GAIN,
        }
    }
}

/// Where an effect lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectTarget {
    /// Insert chain of a slot (0-based).
    Slot(usize),
    /// The master bus.
    Master,
}

/// An immutable view of everything the renderer reads per block.
#[derive(Clone, Debug, Default)]
pub struct MixTable {
    pub slots: [Option<ChannelSlot>; NUM_SLOTS],
    pub master: MasterBus,
    pub routing: RoutingTable,
}

impl MixTable {
    /// True if any loaded slot is soloed.
    pub fn any_solo(&self) -> bool {
        self.slots.iter().flatten().any(|slot| slot.solo)
    }

    /// The slot at `index`, if loaded.
    pub fn slot(&self, index: usize) -> Option<&ChannelSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut ChannelSlot, StateError> {
        self.slots
            .get_mut(index)
            .ok_or(StateError::InvalidSlot)?
            .as_mut()
            .ok_or(StateError::EmptySlot(index))
    }

    fn effects_mut(&mut self, target: EffectTarget) -> Result<&mut Vec<SharedPlugin>, StateError> {
        match target {
            EffectTarget::Slot(index) => Ok(&mut self.slot_mut(index)?.effects),
            EffectTarget::Master => Ok(&mut self.master.effects),
        }
    }

    /// Effects of a slot or of the master bus.
    pub fn effects(&self, target: EffectTarget) -> Result<&[SharedPlugin], StateError> {
        match target {
            EffectTarget::Slot(index) => {
                if index >= NUM_SLOTS {
                    return Err(StateError::InvalidSlot);
                }
                self.slot(index)
                    .map(|slot| slot.effects.as_slice())
                    .ok_or(StateError::EmptySlot(index))
            }
            EffectTarget::Master => Ok(&self.master.effects),
        }
    }
}

/// Owner of the mixer state.
///
/// Readers call [`load`](Self::load) or [`snapshot`](Self::snapshot). Writers
/// call one of the mutation methods, each of which is atomic.
#[derive(Debug, Default)]
pub struct MixerState {
    table: ArcSwap<MixTable>,
    writer: Mutex<()>,
    /// Bumped whenever a slot's instrument is replaced or removed.
    generations: [AtomicU64; NUM_SLOTS],
}

impl MixerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock-free read of the current table. Used by the audio thread.
    #[inline]
    pub fn load(&self) -> Guard<Arc<MixTable>> {
        self.table.load()
    }

    /// An owned handle to the current table.
    pub fn snapshot(&self) -> Arc<MixTable> {
        self.table.load_full()
    }

    /// Clones the table, applies `f` and publishes the result if `f` succeeds.
    fn update<R>(
        &self,
        f: impl FnOnce(&mut MixTable) -> Result<R, StateError>,
    ) -> Result<R, StateError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = MixTable::clone(&self.table.load());
        let result = f(&mut next)?;
        self.table.store(Arc::new(next));
        Ok(result)
    }

    fn check_slot(index: usize) -> Result<(), StateError> {
        if index < NUM_SLOTS {
            Ok(())
        } else {
            Err(StateError::InvalidSlot)
        }
    }

    /// Current generation of a slot. Scheduled events carry this as a
    /// cancellation token.
    pub fn generation(&self, index: usize) -> u64 {
        self.generations
            .get(index)
            .map_or(0, |g| g.load(Ordering::Acquire))
    }

    fn bump_generation(&self, index: usize) {
        if let Some(g) = self.generations.get(index) {
            g.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Puts a slot into `index`, replacing whatever was there.
    ///
    /// The slot's routed channels are taken from the routing table, so routes
    /// recorded while the slot was empty apply immediately.
    pub fn install_slot(&self, index: usize, mut slot: ChannelSlot) -> Result<Option<ChannelSlot>, StateError> {
        Self::check_slot(index)?;
        self.bump_generation(index);
        self.update(|table| {
            slot.routed_channels = table.routing.channels_for(index);
            Ok(table.slots[index].replace(slot))
        })
    }

    /// Empties a slot. The routing table keeps its entries.
    pub fn clear_slot(&self, index: usize) -> Result<Option<ChannelSlot>, StateError> {
        Self::check_slot(index)?;
        self.bump_generation(index);
        self.update(|table| Ok(table.slots[index].take()))
    }

    /// Appends an effect. Returns its 0-based position in the chain.
    pub fn add_effect(&self, target: EffectTarget, effect: SharedPlugin) -> Result<usize, StateError> {
        self.update(|table| {
            let chain = table.effects_mut(target)?;
            chain.push(effect);
            Ok(chain.len() - 1)
        })
    }

    /// Removes an effect by 0-based position.
    pub fn remove_effect(&self, target: EffectTarget, index: usize) -> Result<SharedPlugin, StateError> {
        self.update(|table| {
            let chain = table.effects_mut(target)?;
            if index >= chain.len() {
                return Err(StateError::InvalidEffect);
            }
            Ok(chain.remove(index))
        })
    }

    /// Looks up an effect by 0-based position.
    pub fn effect(&self, target: EffectTarget, index: usize) -> Result<SharedPlugin, StateError> {
        self.load()
            .effects(target)?
            .get(index)
            .cloned()
            .ok_or(StateError::InvalidEffect)
    }

    /// The instrument loaded in a slot.
    pub fn instrument(&self, index: usize) -> Result<SharedPlugin, StateError> {
        Self::check_slot(index)?;
        self.load()
            .slot(index)
            .map(|slot| slot.instrument.clone())
            .ok_or(StateError::EmptySlot(index))
    }

    pub fn set_gain(&self, index: usize, gain: f32) -> Result<(), StateError> {
        self.update(|table| {
            table.slot_mut(index)?.gain = gain;
            Ok(())
        })
    }

    pub fn set_muted(&self, index: usize, muted: bool) -> Result<(), StateError> {
        self.update(|table| {
            table.slot_mut(index)?.muted = muted;
            Ok(())
        })
    }

    pub fn set_solo(&self, index: usize, solo: bool) -> Result<(), StateError> {
        self.update(|table| {
            table.slot_mut(index)?.solo = solo;
            Ok(())
        })
    }

    /// Flips mute. Returns the slot name and the new value.
    pub fn toggle_mute(&self, index: usize) -> Result<(String, bool), StateError> {
        self.update(|table| {
            let slot = table.slot_mut(index)?;
            slot.muted = !slot.muted;
            Ok((slot.name.clone(), slot.muted))
        })
    }

    /// Flips solo. Returns the slot name and the new value.
    pub fn toggle_solo(&self, index: usize) -> Result<(String, bool), StateError> {
        self.update(|table| {
            let slot = table.slot_mut(index)?;
            slot.solo = !slot.solo;
            Ok((slot.name.clone(), slot.solo))
        })
    }

    pub fn master_gain(&self) -> f32 {
        self.load().master.gain
    }

    pub fn set_master_gain(&self, gain: f32) {
        // The closure cannot fail.
        let _ = self.update(|table| {
            table.master.gain = gain;
            Ok(())
        });
    }

    /// Routes a channel to a slot and keeps slot membership in sync.
    ///
    /// Returns the slot the channel was routed to before.
    pub fn route(&self, channel: u8, slot: usize) -> Result<Option<usize>, StateError> {
        self.update(|table| {
            let previous = table.routing.route(channel, slot)?;
            if let Some(prev) = previous.filter(|&p| p != slot) {
                if let Some(old) = table.slots[prev].as_mut() {
                    old.routed_channels.remove(&channel);
                }
            }
            if let Some(new) = table.slots[slot].as_mut() {
                new.routed_channels.insert(channel);
            }
            Ok(previous)
        })
    }

    /// Removes a route. Unknown channels are a no-op and return `None`.
    pub fn unroute(&self, channel: u8) -> Option<usize> {
        self.update(|table| {
            let previous = table.routing.unroute(channel);
            if let Some(prev) = previous {
                if let Some(slot) = table.slots[prev].as_mut() {
                    slot.routed_channels.remove(&channel);
                }
            }
            Ok(previous)
        })
        .unwrap_or(None)
    }

    /// Slot a channel is routed to.
    pub fn lookup_route(&self, channel: u8) -> Option<usize> {
        self.load().routing.lookup(channel)
    }
}
