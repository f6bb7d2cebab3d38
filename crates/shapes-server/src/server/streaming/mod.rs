//! The interaction layer shared by every service.
//!
//! - [`tracker`] - admission, in-flight accounting and the shutdown token.
//! - [`context`] - per-call deadline and cancellation ([`CallContext`]).
//! - [`producer`] - server-streaming responses fed from a spawned task.
//! - [`collector`] - client-streaming input folded until half-close.
//! - [`duplex`] - bidirectional calls as a two-direction state machine.
//!
//! Unary calls need nothing beyond a [`CallContext`].

pub mod collector;
pub mod context;
pub mod duplex;
pub mod producer;
pub mod tracker;

pub use context::CallContext;
pub use producer::ResponseStream;
pub use tracker::CallTracker;
