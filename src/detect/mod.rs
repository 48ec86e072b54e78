//! Detectors for worker events.

pub mod interruption;
pub mod submission;

pub use interruption::{
    InterruptionHandler, InterruptionTracker, SingleSlotTracker, TitleOutcome,
    is_interruption_title,
};
pub use submission::{SubmissionDetector, SubmissionOutcome, is_submission};
