//! Core domain models
//!
//! Run records, their lifecycle rules, uploaded target rows and the
//! application configuration.

pub mod config;
pub mod state;
pub mod target;

pub use state::*;
pub use target::*;
