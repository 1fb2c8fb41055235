//! Rate limit bucket keys for HTTP requests, and the layers that count them.

pub mod key;
pub mod rate_limit;
