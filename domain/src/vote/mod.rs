//! Voting primitives: votes, vote sessions, aggregation, threshold
//! evaluation, and vote-response parsing.

pub mod aggregate;
pub mod entities;
pub mod parsing;
pub mod threshold;
