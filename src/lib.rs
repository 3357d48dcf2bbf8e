//! cachemark — benchmark server comparing serving strategies for a
//! synthetic "items" dataset: no caching, unconditional in-memory caching,
//! and TTL caching with single-flight regeneration.
//!
//! The engineering core is [`cache::ResponseCache`]; everything else is
//! the HTTP surface and the simulated/real data sources it is measured
//! against.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod source;
