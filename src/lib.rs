pub mod common;
pub mod configs;
pub mod download;
pub mod sources;
pub mod transport;

pub use common::errors::{Error, ErrorCategory, Result, UnavailableReason};
