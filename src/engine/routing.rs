//! Controller channel to slot routing.

use std::collections::{BTreeMap, BTreeSet};

use super::state::{StateError, NUM_SLOTS};

/// Number of MIDI channels.
pub const NUM_CHANNELS: u8 = 16;

/// Maps MIDI channels (0-15) to slot indices (0-7).
///
/// Each channel maps to at most one slot. Several channels may share a slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingTable {
    map: BTreeMap<u8, usize>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a channel and slot pair without changing anything.
    pub fn validate(channel: u8, slot: usize) -> Result<(), StateError> {
        if channel >= NUM_CHANNELS {
            return Err(StateError::InvalidChannel);
        }
        if slot >= NUM_SLOTS {
            return Err(StateError::InvalidSlot);
        }
        Ok(())
    }

    /// Routes `channel` to `slot`, returning the slot it was previously routed to.
    pub fn route(&mut self, channel: u8, slot: usize) -> Result<Option<usize>, StateError> {
        Self::validate(channel, slot)?;
        Ok(self.map.insert(channel, slot))
    }

    /// Removes a route, returning the slot it pointed to. Unknown channels are a no-op.
    pub fn unroute(&mut self, channel: u8) -> Option<usize> {
        self.map.remove(&channel)
    }

    /// Slot a channel is routed to.
    pub fn lookup(&self, channel: u8) -> Option<usize> {
        self.map.get(&channel).copied()
    }

    /// All routes, ordered by channel.
    pub fn entries(&self) -> impl Iterator<Item = (u8, usize)> + '_ {
        self.map.iter().map(|(&ch, &slot)| (ch, slot))
    }

    /// Channels routed to a slot.
    pub fn channels_for(&self, slot: usize) -> BTreeSet<u8> {
        self.entries()
            .filter(|&(_, s)| s == slot)
            .map(|(ch, _)| ch)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_is_left_unique() {
        let mut table = RoutingTable::new();
        assert_eq!(table.route(4, 0).unwrap(), None);
        assert_eq!(table.route(4, 3).unwrap(), Some(0));
        assert_eq!(table.lookup(4), Some(3));
        assert_eq!(table.len(), 1);
        assert!(table.channels_for(0).is_empty());
    }

    #[test]
    fn test_route_validation_leaves_table_unchanged() {
        let mut table = RoutingTable::new();
        table.route(1, 1).unwrap();
        assert_eq!(table.route(16, 0), Err(StateError::InvalidChannel));
        assert_eq!(table.route(0, 8), Err(StateError::InvalidSlot));
        assert_eq!(table.entries().collect::<Vec<_>>(), vec![(1, 1)]);
    }

    #[test]
    fn test_unroute_unknown_is_noop() {
        let mut table = RoutingTable::new();
        table.route(2, 5).unwrap();
        assert_eq!(table.unroute(9), None);
        assert_eq!(table.unroute(2), Some(5));
        assert!(table.is_empty());
    }

    #[test]
    fn test_channels_for_slot() {
        let mut table = RoutingTable::new();
        table.route(0, 2).unwrap();
        table.route(9, 2).unwrap();
        table.route(3, 1).unwrap();
        assert_eq!(table.channels_for(2), BTreeSet::from([0, 9]));
        assert_eq!(
            table.entries().collect::<Vec<_>>(),
            vec![(0, 2), (3, 1), (9, 2)]
        );
    }
}
