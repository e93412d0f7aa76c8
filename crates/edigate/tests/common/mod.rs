//! Shared test utilities for edigate integration tests.
//!
//! This module provides:
//! - `TestHarness`: a temp database plus mock provider, ERP and Telegram servers
//! - Builders for provider payloads and connection settings

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
