//! API schema types for request/response definitions.
//!
//! Each sub-module defines the request and response types for a specific
//! API domain. Types use serde derives for JSON serialization/deserialization.
//! Quantities cross the API as decimal numbers and are converted to
//! fixed-point at this boundary.

pub mod common;
pub mod edges;
pub mod emissions;
