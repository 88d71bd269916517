//! Test-support crate: fixtures, a [`world::TestWorld`] harness wiring
//! the engine to the scripted adapter, and event-log assertion helpers.
//! Used by every crate's integration tests; not part of the runtime
//! itself.

pub mod assertions;
pub mod fixtures;
pub mod world;

pub use world::TestWorld;
