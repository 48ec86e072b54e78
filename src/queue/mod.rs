//! Local model of the remote task queue.
//!
//! - `item`: `WorkItem` identity and the ordered `Queue`
//! - `poller`: refreshes the queue from the remote listing

pub mod item;
pub mod poller;

pub use item::{Queue, WorkItem};
pub use poller::{QueuePoller, RefreshError};
