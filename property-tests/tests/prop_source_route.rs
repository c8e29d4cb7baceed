//! Property tests for source routes
//!
//! - remove_first never drops the final destination
//! - reversal is an involution
//! - the array-of-ids form parses back to the same route

use ocpp_nn_core::{NodeId, SourceRoute};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn node_id() -> impl Strategy<Value = NodeId> {
    "[A-Z0-9]{1,8}".prop_map(NodeId::new)
}

fn route(max_len: usize) -> impl Strategy<Value = SourceRoute> {
    prop::collection::vec(node_id(), 0..max_len).prop_map(SourceRoute::from_hops)
}

// ============================================================================
// Hop Removal
// ============================================================================

proptest! {
    /// CORE INVARIANT: the final destination survives any number of removals
    #[test]
    fn remove_first_keeps_last(route in route(12), removals in 0usize..20) {
        let mut current = route.clone();
        for _ in 0..removals {
            current = current.remove_first();
        }

        prop_assert_eq!(current.last(), route.last());
        if !route.is_empty() {
            prop_assert!(!current.is_empty());
        }
    }

    /// Each removal shortens a multi-hop route by exactly one
    #[test]
    fn remove_first_shortens_by_one(route in route(12)) {
        let next = route.remove_first();
        if route.len() <= 1 {
            prop_assert_eq!(next, route);
        } else {
            prop_assert_eq!(next.len(), route.len() - 1);
            prop_assert_eq!(next.hops(), &route.hops()[1..]);
        }
    }

    /// Appending a hop makes it the final destination
    #[test]
    fn with_hop_sets_last(route in route(8), hop in node_id()) {
        let extended = route.with_hop(hop.clone());
        prop_assert_eq!(extended.len(), route.len() + 1);
        prop_assert_eq!(extended.last(), hop);
        prop_assert!(extended.contains(&extended.next()));
    }
}

// ============================================================================
// Reversal and Wire Form
// ============================================================================

proptest! {
    #[test]
    fn reversed_twice_is_identity(route in route(12)) {
        prop_assert_eq!(route.reversed().reversed(), route.clone());
        prop_assert_eq!(route.reversed().next(), route.last());
    }

    #[test]
    fn json_form_parses_back(route in route(12)) {
        let parsed = SourceRoute::parse(&route.to_json()).unwrap();
        prop_assert_eq!(parsed, route);
    }

    /// A strict prefix orders before the longer route
    #[test]
    fn prefix_orders_first(route in route(8), hop in node_id()) {
        prop_assert!(route < route.with_hop(hop));
    }
}
