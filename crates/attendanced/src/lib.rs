//! attendanced: face-matched attendance over an HTTP API.
//!
//! The binary wires these together; the library split lets the API be
//! exercised in-process by integration tests.

pub mod api;
pub mod chatbot;
pub mod config;
pub mod engine;
pub mod store;
