//! Use cases driving meetings.

pub mod create_meeting;
pub mod facilitator;
pub mod run_meeting;
pub mod shared;
