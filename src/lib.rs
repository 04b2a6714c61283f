//! Room booking engine: per-date availability, conflict-free booking
//! validation and temporal classification, served over the PostgreSQL wire
//! protocol.

pub mod auth;
pub mod clock;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod slots;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
