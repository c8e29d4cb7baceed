//! Overlay routing: reachability candidates and the routing table

pub mod reachability;
pub mod table;

pub use reachability::{Reachability, Via};
pub use table::{Resolution, RoutingTable};
