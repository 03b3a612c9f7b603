//! adaptest-core — Module graph, scoring, routing and the session state machine.
//!
//! This crate holds everything about an adaptive test that does not touch
//! I/O: the authored data model, graph validation, the scorer and router
//! consulted at module boundaries, and the [`session::Session`] that owns a
//! single attempt.

pub mod error;
pub mod graph;
pub mod model;
pub mod parser;
pub mod result;
pub mod router;
pub mod scorer;
pub mod session;
pub mod snapshot;
