//! Types shared by the server and the client drivers.
//!
//! - [`error`] - the closed error taxonomy and its mapping onto
//!   [`tonic::Status`].
//! - [`types`] - document identity and the domain document type.

pub mod error;
pub mod types;

pub use error::{Error, Result};
