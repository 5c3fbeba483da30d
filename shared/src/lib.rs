//! Shared types and models for the Shelter Volunteers platform
//!
//! This crate contains types shared between the backend, the frontend (via
//! WASM), and other components of the system. It performs no I/O.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
