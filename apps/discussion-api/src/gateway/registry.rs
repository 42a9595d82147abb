//! Room membership: which outbound queues belong to which discussion.
//!
//! Owned exclusively by the hub task, so there is no locking here.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::events::OutboundFrame;

/// Sending half of a connection's bounded outbound queue.
pub type Outbound = mpsc::Sender<OutboundFrame>;

/// Result of one multicast.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MulticastOutcome {
    /// Members that accepted the frame.
    pub delivered: usize,
    /// Members removed because their queue was full.
    pub evicted: Vec<String>,
    /// Members removed because their writer had already gone away.
    pub stale: Vec<String>,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, HashMap<String, Outbound>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member. Returns false, leaving the existing entry untouched, if
    /// the session is already in the room.
    pub fn join(&mut self, room_id: &str, session_id: &str, outbound: Outbound) -> bool {
        let members = self.rooms.entry(room_id.to_string()).or_default();
        if members.contains_key(session_id) {
            return false;
        }
        members.insert(session_id.to_string(), outbound);
        true
    }

    /// Remove a member, dropping its queue sender. Empty rooms are discarded.
    /// Leaving a room the session is not in is a no-op.
    pub fn leave(&mut self, room_id: &str, session_id: &str) -> bool {
        let Some(members) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let removed = members.remove(session_id).is_some();
        if members.is_empty() {
            self.rooms.remove(room_id);
        }
        removed
    }

    /// Offer `frame` to every member of `room_id` without waiting. Members
    /// that cannot take it right now are removed from the room; their queue
    /// closes once the writer drains what it already holds.
    pub fn multicast(&mut self, room_id: &str, frame: &OutboundFrame) -> MulticastOutcome {
        let mut outcome = MulticastOutcome::default();
        let Some(members) = self.rooms.get_mut(room_id) else {
            return outcome;
        };

        members.retain(|session_id, outbound| match outbound.try_send(frame.clone()) {
            Ok(()) => {
                outcome.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                outcome.evicted.push(session_id.clone());
                false
            }
            Err(TrySendError::Closed(_)) => {
                outcome.stale.push(session_id.clone());
                false
            }
        });

        if members.is_empty() {
            self.rooms.remove(room_id);
        }
        outcome
    }

    pub fn contains(&self, room_id: &str, session_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|members| members.contains_key(session_id))
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, HashMap::len)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Member count per room, ordered by room id.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.rooms
            .iter()
            .map(|(room_id, members)| (room_id.clone(), members.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(capacity: usize) -> (Outbound, mpsc::Receiver<OutboundFrame>) {
        mpsc::channel(capacity)
    }

    #[test]
    fn join_and_leave_track_membership() {
        let mut registry = RoomRegistry::new();
        let (a, _rx_a) = queue(4);
        let (b, _rx_b) = queue(4);

        assert!(registry.join("dsc_1", "ws_a", a));
        assert!(registry.join("dsc_1", "ws_b", b));
        assert_eq!(registry.member_count("dsc_1"), 2);

        assert!(registry.leave("dsc_1", "ws_a"));
        assert!(!registry.contains("dsc_1", "ws_a"));
        assert_eq!(registry.member_count("dsc_1"), 1);
    }

    #[test]
    fn duplicate_join_keeps_first_entry() {
        let mut registry = RoomRegistry::new();
        let (first, mut rx_first) = queue(4);
        let (second, mut rx_second) = queue(4);

        assert!(registry.join("dsc_1", "ws_a", first));
        assert!(!registry.join("dsc_1", "ws_a", second));

        registry.multicast("dsc_1", &OutboundFrame::from("hello"));
        assert!(rx_first.try_recv().is_ok());
        assert!(rx_second.try_recv().is_err());
    }

    #[test]
    fn leave_is_idempotent_and_drops_empty_rooms() {
        let mut registry = RoomRegistry::new();
        let (a, _rx) = queue(4);
        registry.join("dsc_1", "ws_a", a);

        assert!(registry.leave("dsc_1", "ws_a"));
        assert!(!registry.leave("dsc_1", "ws_a"));
        assert!(!registry.leave("dsc_unknown", "ws_a"));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn leave_closes_the_member_queue() {
        let mut registry = RoomRegistry::new();
        let (a, mut rx) = queue(4);
        registry.join("dsc_1", "ws_a", a);
        registry.multicast("dsc_1", &OutboundFrame::from("last"));
        registry.leave("dsc_1", "ws_a");

        assert_eq!(rx.try_recv().unwrap().as_str(), "last");
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn multicast_reaches_only_the_target_room() {
        let mut registry = RoomRegistry::new();
        let (a, mut rx_a) = queue(4);
        let (b, mut rx_b) = queue(4);
        registry.join("dsc_1", "ws_a", a);
        registry.join("dsc_2", "ws_b", b);

        let outcome = registry.multicast("dsc_1", &OutboundFrame::from("one"));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(rx_a.try_recv().unwrap().as_str(), "one");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn multicast_to_unknown_room_is_a_no_op() {
        let mut registry = RoomRegistry::new();
        assert_eq!(
            registry.multicast("dsc_none", &OutboundFrame::from("x")),
            MulticastOutcome::default()
        );
    }

    #[test]
    fn full_queue_is_evicted_without_affecting_others() {
        let mut registry = RoomRegistry::new();
        let (slow, _rx_slow) = queue(1);
        let (fast, mut rx_fast) = queue(8);
        registry.join("dsc_1", "ws_slow", slow);
        registry.join("dsc_1", "ws_fast", fast);

        let first = registry.multicast("dsc_1", &OutboundFrame::from("1"));
        assert_eq!(first.delivered, 2);

        let second = registry.multicast("dsc_1", &OutboundFrame::from("2"));
        assert_eq!(second.delivered, 1);
        assert_eq!(second.evicted, vec!["ws_slow".to_string()]);
        assert!(!registry.contains("dsc_1", "ws_slow"));

        assert_eq!(rx_fast.try_recv().unwrap().as_str(), "1");
        assert_eq!(rx_fast.try_recv().unwrap().as_str(), "2");
    }

    #[test]
    fn closed_queue_is_reported_stale() {
        let mut registry = RoomRegistry::new();
        let (gone, rx) = queue(4);
        registry.join("dsc_1", "ws_gone", gone);
        drop(rx);

        let outcome = registry.multicast("dsc_1", &OutboundFrame::from("x"));
        assert_eq!(outcome.stale, vec!["ws_gone".to_string()]);
        assert_eq!(registry.room_count(), 0);
    }
}
