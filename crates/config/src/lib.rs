//! Configuration module for the decode pool runner
//!
//! Handles loading configuration from TOML files and environment variable overrides.

pub mod config;

pub use config::*;
