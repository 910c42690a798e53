//! Common test utilities and fixtures for shoal integration tests
//!
//! This module provides:
//! - `TestRepo` builder for creating repositories with a `.shoal.yaml`
//! - Fake analyzers and in-process / HTTP analyzer endpoints
//! - Custom assertions for driver responses

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;
pub use test_repo::TestRepo;
