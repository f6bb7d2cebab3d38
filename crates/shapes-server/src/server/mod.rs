//! Server internals.
//!
//! - [`config`] - CLI/environment configuration.
//! - [`lifecycle`] - binding, serving and graceful shutdown.
//! - [`service`] - the gRPC service implementations.
//! - [`store`] - the document store boundary and the in-memory engine.
//! - [`streaming`] - call tracking and the four interaction shapes.
//! - [`telemetry`] - logging, tracing and metrics setup.

pub mod config;
pub mod lifecycle;
pub mod service;
pub mod store;
pub mod streaming;
pub mod telemetry;
