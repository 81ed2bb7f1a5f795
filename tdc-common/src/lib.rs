//! # TDC Common Library
//!
//! Shared code for the Train Door Choice survey services:
//! - Error type shared across crates
//! - Bootstrap configuration (TOML file, environment, command line)
//! - Wall-clock helpers for survey timing

pub mod config;
pub mod error;
pub mod time;

pub use error::{Error, Result};
