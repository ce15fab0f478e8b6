//! # SPT Common Library
//!
//! Shared code for the Sales Presales Tracker services:
//! - Error types
//! - Bootstrap configuration loading (TOML + environment + CLI)
//! - Logging initialization
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
