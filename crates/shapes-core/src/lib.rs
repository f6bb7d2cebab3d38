#![doc = include_str!("../README.md")]

pub mod client;
mod common;
pub mod proto;

pub use common::*;
