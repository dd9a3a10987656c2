//! Tests for sidekick-protocol

#[cfg(test)]
pub mod events_tests;
