//! Integration tests for rate limiting layers.
//!
//! These tests drive an axum router through the limiter, the way a service
//! mounts it, and observe which requests are turned away.

mod helpers;

pub use helpers::*;
