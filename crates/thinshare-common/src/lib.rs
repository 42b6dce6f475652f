//! thinshare Common - Shared types and utilities
//!
//! This crate provides the identifier types, error taxonomy and
//! configuration used by every thinshare component.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
