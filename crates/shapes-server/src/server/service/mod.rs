//! gRPC service implementations.
//!
//! Each service owns a handle to the shared [`CallTracker`] and admits every
//! call through it before doing any work.
//!
//! ## Structure
//!
//! - [`greet`] - `greet.Greeter` (`GreetService`), one method per call shape
//!   plus the deadline demo.
//! - [`calculator`] - `calculator.Calculator` (`CalculatorService`).
//! - [`document`] - `document.Documents` (`DocumentService`), CRUD over a
//!   [`DocumentStore`](crate::server::store::DocumentStore).
//!
//! [`CallTracker`]: crate::server::streaming::CallTracker

pub mod calculator;
pub mod document;
pub mod greet;

use crate::server::config::ServerConfig;
use core::time::Duration;

/// The part of [`ServerConfig`] the handlers read.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub stream_buffer_size: usize,
    pub greet_interval: Duration,
    pub deadline_steps: u32,
    pub deadline_step: Duration,
}

impl From<&ServerConfig> for ServiceSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            stream_buffer_size: config.stream_buffer_size,
            greet_interval: config.greet_interval,
            deadline_steps: config.deadline_steps,
            deadline_step: config.deadline_step,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            stream_buffer_size: 8,
            greet_interval: Duration::from_secs(1),
            deadline_steps: 3,
            deadline_step: Duration::from_secs(1),
        }
    }
}
