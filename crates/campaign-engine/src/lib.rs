//! Campaign rule evaluation and progress caching.
//!
//! The `campaigns` module holds the engine: a closed set of rule kinds evaluated against a
//! pre-fetched metrics snapshot, a snapshot cache keyed by campaign and user, and the HTTP
//! router that exposes both to the agent portal.

pub mod campaigns;
pub mod config;
pub mod error;
pub mod telemetry;
