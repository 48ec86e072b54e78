//! Queue Tabber claims remote tasks into a local queue and works them in
//! browser tabs.

pub mod bridge;
pub mod claim;
pub mod config;
pub mod context;
pub mod detect;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod queue;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod worker;
