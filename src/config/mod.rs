//! Configuration module
//!
//! Handles loading relay settings from TOML.

mod settings;

pub use settings::*;
