//! Shared test utilities for groupvars integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated group_vars trees and key directories
//! - Builders for inventory files

pub mod builders;
pub mod harness;

pub use builders::*;
#[allow(unused_imports)]
pub use harness::{doc, TestHarness, EJSON_FIXTURE, TEST_PRIVATE_KEY, TEST_PUBLIC_KEY};
