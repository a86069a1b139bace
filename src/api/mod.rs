//! Service-edge HTTP layer.
//!
//! A small axum router exposing health and per-user stats, fronted by the
//! fixed-window rate filter. Every route passes Rate Limit → Handler; the
//! filter keys on client address plus user-agent prefix and exempts known
//! crawlers so indexing never trips 429s.

pub mod error;
pub mod middleware;
pub mod router;
pub mod types;

pub use router::edge_router;
pub use types::{ApiContext, FixedWindowLimiter};
