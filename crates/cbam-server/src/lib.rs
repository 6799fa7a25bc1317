//! HTTP/JSON API server for the CBAM emission graph.
//!
//! Exposes edge CRUD, incremental and full-graph recalculation, and
//! read-only emission queries. This crate contains the recalculation
//! coordinator ([`service::EmissionService`]), the per-graph run lock, API
//! schema types, error handling, and route definitions.

pub mod concurrency;
pub mod error;
pub mod handlers;
pub mod router;
pub mod schema;
pub mod service;
pub mod state;
