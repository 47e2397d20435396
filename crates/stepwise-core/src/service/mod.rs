//! Capability traits for the outside world: filesystem, HTTP, clock.
//!
//! Implementations live in stepwise-infra; tests use in-memory mocks.

pub mod clock;
pub mod fs;
pub mod http;
