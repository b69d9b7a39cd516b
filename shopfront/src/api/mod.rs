//! HTTP surface: request/response models and handlers.
//!
//! Deliberately thin - routing, binding, and validation are glue around the
//! auth and resolution services, which hold all of the actual behavior.

pub mod handlers;
pub mod models;
