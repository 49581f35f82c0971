//! # RenoTimeline Gateway
//!
//! Thin HTTP surface over the scheduler core. An external cron hits the
//! scan endpoint on a 5–15 minute cadence; the owning application posts
//! task status transitions; operators read the execution log. CRUD for
//! workflow definitions, tasks, and notifications lives elsewhere in the
//! application and is deliberately absent here.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
