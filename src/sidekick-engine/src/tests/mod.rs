//! Integration tests for the engine's async pieces.

mod support;
