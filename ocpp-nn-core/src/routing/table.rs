//! Routing table
//!
//! Maps destination nodes to their reachability candidates and resolves the
//! concrete next hop, chasing hub chains with loop detection.
//!
//! Candidate lists are stored behind `Arc` and never mutated in place. A
//! writer builds a new list under the destination's shard lock and swaps it
//! in, so a concurrent `resolve` observes either the old or the new list.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::reachability::{Reachability, Via};
use crate::types::{ConnectionHandle, Direction, NodeId};

/// Outcome of a successful lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub destination: NodeId,
    /// Candidate chosen among the destination's own entries
    pub candidate: Reachability,
    /// Candidate the chase ended on; direct unless resolution was best effort
    pub terminal: Reachability,
    /// Hubs traversed, in order
    pub hubs: Vec<NodeId>,
    pub loop_detected: bool,
}

impl Resolution {
    /// Connection to send on, if the chase reached a direct candidate
    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.terminal.connection()
    }

    pub fn is_direct(&self) -> bool {
        !self.terminal.is_indirect()
    }
}

/// Concurrent registry of reachability candidates
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: DashMap<NodeId, Arc<Vec<Reachability>>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the best next hop for `destination` at the current time
    pub fn resolve(&self, destination: &NodeId) -> Option<Resolution> {
        self.resolve_at(destination, Utc::now())
    }

    /// Resolve the best next hop for `destination`, ignoring candidates expired at `now`
    ///
    /// Candidates are tried in preference order and hub chains are chased
    /// until a direct candidate is found. Every hub is expanded at most once.
    /// When nothing resolves to a connection, the greedy chain from the best
    /// candidate is returned as a best-effort result.
    pub fn resolve_at(&self, destination: &NodeId, now: DateTime<Utc>) -> Option<Resolution> {
        if destination.is_zero() {
            return None;
        }

        // Broadcast is a single-hop fan-out, never chased through hubs
        let candidates = self.sorted_candidates(destination, now, destination.is_broadcast());
        let best = candidates.first()?.clone();

        let mut dead_ends = HashSet::new();
        let mut loop_detected = false;

        for candidate in &candidates {
            let mut hubs = Vec::new();
            if let Some(terminal) = self.chase(
                destination,
                candidate,
                now,
                &mut dead_ends,
                &mut hubs,
                &mut loop_detected,
            ) {
                debug!(
                    destination = %destination,
                    via = %terminal.via,
                    hops = hubs.len(),
                    "Route resolved"
                );
                return Some(Resolution {
                    destination: destination.clone(),
                    candidate: candidate.clone(),
                    terminal,
                    hubs,
                    loop_detected,
                });
            }
        }

        let (terminal, hubs, looped) = self.greedy_chain(destination, &best, now);
        if looped {
            warn!(destination = %destination, hubs = ?hubs, "Routing loop detected");
        } else {
            debug!(destination = %destination, hubs = ?hubs, "No direct route behind hub chain");
        }

        Some(Resolution {
            destination: destination.clone(),
            candidate: best,
            terminal,
            hubs,
            loop_detected: loop_detected || looped,
        })
    }

    /// Depth-first search for a direct candidate behind `candidate`
    ///
    /// A loop is a hub already on the current chain (or the destination
    /// itself). Hubs fully explored without result are remembered in
    /// `dead_ends` and skipped when reached again over another chain.
    fn chase(
        &self,
        destination: &NodeId,
        candidate: &Reachability,
        now: DateTime<Utc>,
        dead_ends: &mut HashSet<NodeId>,
        hubs: &mut Vec<NodeId>,
        loop_detected: &mut bool,
    ) -> Option<Reachability> {
        let hub = match &candidate.via {
            Via::Hub(hub) => hub,
            Via::Outbound(_) | Via::Inbound(_) => return Some(candidate.clone()),
        };

        if hub == destination || hubs.contains(hub) {
            *loop_detected = true;
            return None;
        }
        if dead_ends.contains(hub) {
            return None;
        }

        hubs.push(hub.clone());
        for next in self.sorted_candidates(hub, now, false) {
            if let Some(found) = self.chase(destination, &next, now, dead_ends, hubs, loop_detected) {
                return Some(found);
            }
        }
        hubs.pop();
        dead_ends.insert(hub.clone());

        None
    }

    /// Follow only the best candidate at every step until a loop or a dead end
    fn greedy_chain(
        &self,
        destination: &NodeId,
        start: &Reachability,
        now: DateTime<Utc>,
    ) -> (Reachability, Vec<NodeId>, bool) {
        let mut visited = HashSet::from([destination.clone()]);
        let mut hubs = Vec::new();
        let mut current = start.clone();

        while let Some(hub) = current.hub().cloned() {
            if !visited.insert(hub.clone()) {
                return (current, hubs, true);
            }
            hubs.push(hub.clone());

            match self.sorted_candidates(&hub, now, false).into_iter().next() {
                Some(next) => current = next,
                None => break,
            }
        }

        (current, hubs, false)
    }

    fn sorted_candidates(
        &self,
        destination: &NodeId,
        now: DateTime<Utc>,
        direct_only: bool,
    ) -> Vec<Reachability> {
        // Clone the Arc and release the shard guard before sorting
        let list = match self.routes.get(destination) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Vec::new(),
        };

        let mut candidates: Vec<Reachability> = list
            .iter()
            .filter(|c| !c.is_expired(now))
            .filter(|c| !direct_only || !c.is_indirect())
            .cloned()
            .collect();

        candidates.sort_by(|a, b| a.preference(b));
        candidates
    }

    /// Insert a candidate, replacing any candidate with the same priority
    pub fn insert(&self, candidate: Reachability) {
        debug!(
            destination = %candidate.destination,
            via = %candidate.via,
            priority = candidate.priority,
            "Route registered"
        );

        let priority = candidate.priority;
        match self.routes.entry(candidate.destination.clone()) {
            Entry::Occupied(mut entry) => {
                let next: Vec<Reachability> = entry
                    .get()
                    .iter()
                    .filter(|c| c.priority != priority)
                    .cloned()
                    .chain(std::iter::once(candidate))
                    .collect();
                entry.insert(Arc::new(next));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(vec![candidate]));
            }
        }
    }

    /// Register a static route to `destination`
    pub fn add_or_update_static_route(
        &self,
        destination: NodeId,
        via: Via,
        priority: u8,
        weight: u8,
        timeout: Option<DateTime<Utc>>,
    ) {
        self.insert(
            Reachability::new(destination, via)
                .with_priority(priority)
                .with_weight(weight)
                .with_timeout(timeout),
        );
    }

    /// Register the same transport or hub for several destinations
    pub fn add_or_update_static_routes(
        &self,
        destinations: impl IntoIterator<Item = NodeId>,
        via: Via,
        priority: u8,
        weight: u8,
        timeout: Option<DateTime<Utc>>,
    ) {
        for destination in destinations {
            self.add_or_update_static_route(destination, via.clone(), priority, weight, timeout);
        }
    }

    /// Remove candidates for `destination`
    ///
    /// Without filters every candidate is removed. A hub filter keeps the
    /// removal to candidates through that hub, a priority filter to candidates
    /// of that priority; both may be combined. Returns the number of
    /// candidates removed.
    pub fn remove_static_route(
        &self,
        destination: &NodeId,
        hub: Option<&NodeId>,
        priority: Option<u8>,
    ) -> usize {
        let Entry::Occupied(mut entry) = self.routes.entry(destination.clone()) else {
            return 0;
        };

        let (removed, kept): (Vec<Reachability>, Vec<Reachability>) =
            entry.get().iter().cloned().partition(|c| {
                hub.map_or(true, |hub| c.hub() == Some(hub))
                    && priority.map_or(true, |p| c.priority == p)
            });

        if kept.is_empty() {
            entry.remove();
        } else if !removed.is_empty() {
            entry.insert(Arc::new(kept));
        }

        debug!(destination = %destination, removed = removed.len(), "Route removed");
        removed.len()
    }

    /// Register a live connection as a direct route to `peer`
    pub fn add_connection(
        &self,
        peer: NodeId,
        connection: ConnectionHandle,
        direction: Direction,
        priority: u8,
    ) {
        self.insert(Reachability::direct(peer, connection, direction).with_priority(priority));
    }

    /// Drop every candidate using connection `connection_id`
    pub fn remove_connection(&self, connection_id: u64) -> usize {
        self.retain_candidates(|c| c.connection().map_or(true, |conn| conn.id != connection_id))
    }

    /// Drop every candidate expired at `now`
    pub fn remove_expired(&self, now: DateTime<Utc>) -> usize {
        self.retain_candidates(|c| !c.is_expired(now))
    }

    fn retain_candidates(&self, keep: impl Fn(&Reachability) -> bool) -> usize {
        let mut removed = 0;

        self.routes.retain(|_, list| {
            if list.iter().all(&keep) {
                return true;
            }
            let kept: Vec<Reachability> = list.iter().filter(|c| keep(c)).cloned().collect();
            removed += list.len() - kept.len();
            if kept.is_empty() {
                return false;
            }
            *list = Arc::new(kept);
            true
        });

        removed
    }

    /// Current candidates for `destination`, in resolution order
    pub fn candidates(&self, destination: &NodeId) -> Vec<Reachability> {
        let mut candidates = self
            .routes
            .get(destination)
            .map(|entry| entry.value().as_ref().clone())
            .unwrap_or_default();
        candidates.sort_by(|a, b| a.preference(b));
        candidates
    }

    /// All destinations with at least one candidate, sorted
    pub fn destinations(&self) -> Vec<NodeId> {
        let mut destinations: Vec<NodeId> = self.routes.iter().map(|e| e.key().clone()).collect();
        destinations.sort();
        destinations
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::negotiation::Subprotocol;
    use chrono::Duration;

    fn conn(id: u64) -> ConnectionHandle {
        ConnectionHandle::new(id, format!("peer-{}", id), Subprotocol::default())
    }

    fn hub(id: &str) -> Via {
        Via::Hub(NodeId::from(id))
    }

    #[test]
    fn test_resolve_missing_destination() {
        let table = RoutingTable::new();
        assert!(table.resolve(&"X".into()).is_none());
        assert!(table.resolve(&NodeId::zero()).is_none());
    }

    #[test]
    fn test_resolve_one_hub_hop() {
        let table = RoutingTable::new();
        table.add_or_update_static_route("X".into(), hub("Y"), 0, 0, None);
        table.add_connection("Y".into(), conn(1), Direction::Outbound, 0);

        let resolution = table.resolve(&"X".into()).unwrap();
        assert_eq!(resolution.connection().map(|c| c.id), Some(1));
        assert_eq!(resolution.hubs, vec![NodeId::from("Y")]);
        assert_eq!(resolution.candidate.hub(), Some(&NodeId::from("Y")));
        assert!(!resolution.loop_detected);
    }

    #[test]
    fn test_resolve_prefers_lowest_priority() {
        let table = RoutingTable::new();
        table.add_or_update_static_route("X".into(), Via::Outbound(conn(5)), 5, 0, None);
        table.add_or_update_static_route("X".into(), Via::Outbound(conn(1)), 1, 0, None);
        table.add_or_update_static_route("X".into(), Via::Outbound(conn(3)), 3, 200, None);

        let resolution = table.resolve(&"X".into()).unwrap();
        assert_eq!(resolution.candidate.priority, 1);
        assert_eq!(resolution.connection().map(|c| c.id), Some(1));
    }

    #[test]
    fn test_resolve_cycle_terminates() {
        let table = RoutingTable::new();
        table.add_or_update_static_route("A".into(), hub("B"), 0, 0, None);
        table.add_or_update_static_route("B".into(), hub("A"), 0, 0, None);

        let resolution = table.resolve(&"A".into()).unwrap();
        assert!(resolution.loop_detected);
        assert!(!resolution.is_direct());
        assert!(resolution.connection().is_none());
    }

    #[test]
    fn test_resolve_skips_looping_candidate() {
        let table = RoutingTable::new();
        table.add_or_update_static_route("A".into(), hub("B"), 0, 0, None);
        table.add_or_update_static_route("B".into(), hub("A"), 0, 0, None);
        table.add_or_update_static_route("A".into(), Via::Inbound(conn(7)), 4, 0, None);

        let resolution = table.resolve(&"A".into()).unwrap();
        assert_eq!(resolution.connection().map(|c| c.id), Some(7));
        assert_eq!(resolution.candidate.priority, 4);
        assert!(resolution.loop_detected);
    }

    #[test]
    fn test_resolve_dead_end_hub() {
        let table = RoutingTable::new();
        table.add_or_update_static_route("X".into(), hub("Y"), 0, 0, None);

        let resolution = table.resolve(&"X".into()).unwrap();
        assert!(!resolution.loop_detected);
        assert_eq!(resolution.terminal.hub(), Some(&NodeId::from("Y")));
    }

    #[test]
    fn test_resolve_diamond_is_not_a_loop() {
        let table = RoutingTable::new();
        table.add_or_update_static_route("X".into(), hub("A"), 0, 0, None);
        table.add_or_update_static_route("X".into(), hub("B"), 1, 0, None);
        table.add_or_update_static_route("A".into(), hub("C"), 0, 0, None);
        table.add_or_update_static_route("B".into(), hub("C"), 0, 0, None);

        let resolution = table.resolve(&"X".into()).unwrap();
        assert!(!resolution.loop_detected);
        assert!(resolution.connection().is_none());
        assert_eq!(resolution.hubs, vec![NodeId::from("A"), NodeId::from("C")]);
    }

    #[test]
    fn test_resolve_diamond_reaches_shared_hub() {
        let table = RoutingTable::new();
        table.add_or_update_static_route("X".into(), hub("A"), 0, 0, None);
        table.add_or_update_static_route("X".into(), hub("B"), 1, 0, None);
        table.add_or_update_static_route("A".into(), hub("C"), 0, 0, None);
        table.add_or_update_static_route("B".into(), hub("C"), 0, 0, None);
        table.add_connection("C".into(), conn(3), Direction::Outbound, 0);

        let resolution = table.resolve(&"X".into()).unwrap();
        assert!(!resolution.loop_detected);
        assert_eq!(resolution.connection().map(|c| c.id), Some(3));
        assert_eq!(resolution.hubs, vec![NodeId::from("A"), NodeId::from("C")]);
    }

    #[test]
    fn test_remove_by_priority_only() {
        let table = RoutingTable::new();
        table.add_or_update_static_route("X".into(), hub("Y"), 0, 0, None);
        table.add_or_update_static_route("X".into(), hub("Z"), 1, 0, None);

        assert_eq!(table.remove_static_route(&"X".into(), None, Some(1)), 1);
        let candidates = table.candidates(&"X".into());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].hub(), Some(&NodeId::from("Y")));

        assert_eq!(table.remove_static_route(&"X".into(), None, Some(7)), 0);
        assert_eq!(table.remove_static_route(&"X".into(), None, None), 1);
        assert!(table.candidates(&"X".into()).is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_same_priority_replaces() {
        let table = RoutingTable::new();
        table.add_or_update_static_route("X".into(), hub("Y"), 0, 0, None);
        table.add_or_update_static_route("X".into(), hub("Z"), 0, 0, None);

        let candidates = table.candidates(&"X".into());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].hub(), Some(&NodeId::from("Z")));
    }

    #[test]
    fn test_bulk_registration() {
        let table = RoutingTable::new();
        table.add_or_update_static_routes(
            vec!["CS001".into(), "CS002".into(), "CS003".into()],
            hub("HUB1"),
            1,
            0,
            None,
        );
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.destinations(),
            vec![NodeId::from("CS001"), "CS002".into(), "CS003".into()]
        );
    }

    #[test]
    fn test_remove_all_candidates() {
        let table = RoutingTable::new();
        table.add_or_update_static_route("X".into(), hub("Y"), 0, 0, None);
        table.add_or_update_static_route("X".into(), hub("Z"), 1, 0, None);

        assert_eq!(table.remove_static_route(&"X".into(), None, None), 2);
        assert!(table.is_empty());
        assert_eq!(table.remove_static_route(&"X".into(), None, None), 0);
    }

    #[test]
    fn test_remove_by_hub_and_priority() {
        let table = RoutingTable::new();
        table.add_or_update_static_route("X".into(), hub("Y"), 0, 0, None);
        table.add_or_update_static_route("X".into(), hub("Y"), 1, 0, None);
        table.add_or_update_static_route("X".into(), hub("Z"), 2, 0, None);

        let y = NodeId::from("Y");
        assert_eq!(table.remove_static_route(&"X".into(), Some(&y), Some(1)), 1);
        assert_eq!(table.candidates(&"X".into()).len(), 2);

        assert_eq!(table.remove_static_route(&"X".into(), Some(&y), None), 1);
        let remaining = table.candidates(&"X".into());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].hub(), Some(&NodeId::from("Z")));

        let z = NodeId::from("Z");
        assert_eq!(table.remove_static_route(&"X".into(), Some(&z), None), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_expired_candidates_ignored() {
        let table = RoutingTable::new();
        let now = Utc::now();
        table.add_or_update_static_route(
            "X".into(),
            Via::Outbound(conn(1)),
            0,
            0,
            Some(now - Duration::seconds(1)),
        );
        table.add_or_update_static_route("X".into(), Via::Outbound(conn(2)), 1, 0, None);

        let resolution = table.resolve_at(&"X".into(), now).unwrap();
        assert_eq!(resolution.connection().map(|c| c.id), Some(2));

        assert_eq!(table.remove_expired(now), 1);
        assert_eq!(table.candidates(&"X".into()).len(), 1);
    }

    #[test]
    fn test_remove_connection() {
        let table = RoutingTable::new();
        table.add_connection("A".into(), conn(1), Direction::Inbound, 0);
        table.add_connection("B".into(), conn(2), Direction::Inbound, 0);
        table.add_or_update_static_route("C".into(), hub("A"), 0, 0, None);

        assert_eq!(table.remove_connection(1), 1);
        assert_eq!(table.destinations(), vec![NodeId::from("B"), "C".into()]);
    }

    #[test]
    fn test_broadcast_ignores_hubs() {
        let table = RoutingTable::new();
        table.add_or_update_static_route(NodeId::broadcast(), hub("Y"), 0, 0, None);
        assert!(table.resolve(&NodeId::broadcast()).is_none());

        table.add_or_update_static_route(NodeId::broadcast(), Via::Outbound(conn(3)), 1, 0, None);
        let resolution = table.resolve(&NodeId::broadcast()).unwrap();
        assert_eq!(resolution.connection().map(|c| c.id), Some(3));
    }

    #[test]
    fn test_priority_outranks_weight() {
        let table = RoutingTable::new();
        table.insert(
            Reachability::direct("X".into(), conn(1), Direction::Outbound)
                .with_priority(2)
                .with_weight(200),
        );
        table.insert(Reachability::direct("X".into(), conn(2), Direction::Outbound).with_priority(1));

        assert_eq!(table.resolve(&"X".into()).unwrap().connection().map(|c| c.id), Some(2));
    }

    #[test]
    fn test_concurrent_updates_and_resolves() {
        let table = Arc::new(RoutingTable::new());
        table.add_connection("Y".into(), conn(1), Direction::Outbound, 0);

        let writers: Vec<_> = (0..4u8)
            .map(|i| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        table.add_or_update_static_route("X".into(), hub("Y"), i, i, None);
                    }
                })
            })
            .collect();

        let reader = {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    if let Some(resolution) = table.resolve(&"X".into()) {
                        assert_eq!(resolution.connection().map(|c| c.id), Some(1));
                    }
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        assert_eq!(table.candidates(&"X".into()).len(), 4);
    }
}
