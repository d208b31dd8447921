//! Indicator achievement and remuneration engine for health facilities.
//!
//! Turns a facility's monthly reported field values into per-indicator
//! achievement, capped facility incentives and worker payouts, and keeps one
//! consistent snapshot of those results per (facility, month).

pub mod achievement;
pub mod bulk;
pub mod config;
pub mod error;
pub mod field;
pub mod formula;
pub mod recalc;
pub mod remuneration;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod worker;
