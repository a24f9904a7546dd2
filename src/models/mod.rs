//! Domain models for the cadplan design registry.
//!
//! - [`Design`]: one design identity with its lifecycle state and revision.
//!   The plan, program and mesh files it owns live in the plan store.
//! - [`DesignEvent`]: append-only log of stage outcomes for a design.
//! - [`Snapshot`]: a timestamped copy of a plan taken before it was rewritten.

mod design;
mod history;
mod snapshot;

pub use design::*;
pub use history::*;
pub use snapshot::*;
