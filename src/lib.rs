//! # turnoq
//!
//! Multi-tenant walk-in queue engine for small service businesses.
//!
//! Customers take numbered tickets, staff call and serve them in order.
//! The engine owns the per-tenant, per-day queue state, propagates
//! changes to every peer on the machine through a notification bus with
//! a filesystem fallback, and converges with other devices through a
//! last-write-wins remote sync bridge (Postgres + realtime feed).

pub mod bus;
pub mod business;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod model;
pub mod remote;
pub mod services;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod tenant;
