//! Worker tabs.
//!
//! - `substrate`: the browser tab interface and its events
//! - `pool`: placement, focus, cleanup and teardown of worker tabs

pub mod pool;
pub mod substrate;

pub use pool::{PlacementOutcome, WorkerPool};
pub use substrate::{ResponseEvent, SubstrateEvent, TabHandle, TabInfo, WorkerSubstrate};
