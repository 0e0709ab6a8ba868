//! Scenario-based tests for cascade

mod helpers;

mod error_cascade;
mod registry;
