//! Shared test utilities for flipscout integration tests.
//!
//! This module provides:
//! - Call-counting fake providers for the three lookup capabilities
//! - `TestHarness`, which wires the fakes and a temp-file database into a pipeline

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
