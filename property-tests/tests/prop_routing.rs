//! Property tests for the routing table
//!
//! - lowest priority wins among direct candidates
//! - a candidate replaces any other candidate of the same priority
//! - hub chains that cycle terminate and report the loop

use ocpp_nn_core::{ConnectionHandle, Direction, NodeId, Reachability, RoutingTable, Subprotocol};
use proptest::prelude::*;
use std::collections::BTreeSet;

// ============================================================================
// Strategies
// ============================================================================

fn priorities() -> impl Strategy<Value = BTreeSet<u8>> {
    prop::collection::btree_set(any::<u8>(), 1..10)
}

fn conn(id: u64) -> ConnectionHandle {
    ConnectionHandle::new(id, format!("peer-{}", id), Subprotocol::default())
}

fn station() -> NodeId {
    NodeId::new("CS001")
}

// ============================================================================
// Candidate Preference
// ============================================================================

proptest! {
    /// CORE INVARIANT: the candidate with the lowest priority value is chosen
    #[test]
    fn lowest_priority_wins(priorities in priorities(), shuffle in any::<bool>()) {
        let table = RoutingTable::new();
        let mut ordered: Vec<u8> = priorities.iter().copied().collect();
        if shuffle {
            ordered.reverse();
        }

        for priority in &ordered {
            table.insert(
                Reachability::direct(station(), conn(*priority as u64), Direction::Inbound)
                    .with_priority(*priority),
            );
        }

        let expected = *priorities.iter().next().unwrap() as u64;
        let resolution = table.resolve(&station()).unwrap();
        prop_assert_eq!(resolution.connection().map(|c| c.id), Some(expected));
        prop_assert!(resolution.hubs.is_empty());
        prop_assert!(!resolution.loop_detected);
    }

    /// Inserting at an existing priority leaves one candidate at that priority
    #[test]
    fn same_priority_replaces(priority in any::<u8>(), inserts in 1u64..10) {
        let table = RoutingTable::new();
        for id in 1..=inserts {
            table.insert(
                Reachability::direct(station(), conn(id), Direction::Outbound)
                    .with_priority(priority),
            );
        }

        prop_assert_eq!(table.candidates(&station()).len(), 1);
        let resolution = table.resolve(&station()).unwrap();
        prop_assert_eq!(resolution.connection().map(|c| c.id), Some(inserts));
    }

    /// Distinct priorities accumulate
    #[test]
    fn distinct_priorities_accumulate(priorities in priorities()) {
        let table = RoutingTable::new();
        for priority in &priorities {
            table.insert(Reachability::via_hub(station(), NodeId::new("HUB1")).with_priority(*priority));
        }
        prop_assert_eq!(table.candidates(&station()).len(), priorities.len());
    }
}

// ============================================================================
// Hub Chains
// ============================================================================

proptest! {
    /// A chain of hubs ending in a direct connection resolves through every hub
    #[test]
    fn hub_chain_resolves_in_order(depth in 1usize..8) {
        let table = RoutingTable::new();
        let hubs: Vec<NodeId> = (0..depth).map(|i| NodeId::new(format!("HUB{}", i))).collect();

        table.insert(Reachability::via_hub(station(), hubs[0].clone()));
        for pair in hubs.windows(2) {
            table.insert(Reachability::via_hub(pair[0].clone(), pair[1].clone()));
        }
        table.insert(Reachability::direct(hubs[depth - 1].clone(), conn(7), Direction::Outbound));

        let resolution = table.resolve(&station()).unwrap();
        prop_assert!(resolution.is_direct());
        prop_assert_eq!(resolution.connection().map(|c| c.id), Some(7));
        prop_assert_eq!(resolution.hubs, hubs);
        prop_assert!(!resolution.loop_detected);
    }

    /// CORE INVARIANT: a cycle of hubs terminates with the loop reported
    #[test]
    fn hub_cycle_terminates(cycle in 1usize..8) {
        let table = RoutingTable::new();
        let hubs: Vec<NodeId> = (0..cycle).map(|i| NodeId::new(format!("HUB{}", i))).collect();

        table.insert(Reachability::via_hub(station(), hubs[0].clone()));
        for (i, hub) in hubs.iter().enumerate() {
            let next = hubs[(i + 1) % cycle].clone();
            table.insert(Reachability::via_hub(hub.clone(), next));
        }

        let resolution = table.resolve(&station()).unwrap();
        prop_assert!(resolution.loop_detected);
        prop_assert!(resolution.connection().is_none());
        prop_assert!(resolution.hubs.len() <= cycle);
    }
}
