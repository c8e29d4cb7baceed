//! OCPP Networking Node Property-Based Tests
//!
//! Standalone test suite using proptest for routing invariants.
//!
//! # Usage
//!
//! ```bash
//! cargo test -p ocpp-nn-property-tests
//! cargo test -p ocpp-nn-property-tests source_route
//! PROPTEST_CASES=1000 cargo test -p ocpp-nn-property-tests
//! ```
//!
//! # Test Modules
//!
//! - `source_route`: hop removal, reversal, wire form
//! - `routing`: candidate preference, replacement, hub chain termination

// Re-export for convenience in tests
pub use ocpp_nn_core::*;
