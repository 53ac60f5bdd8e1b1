//! Configuration models and loading
//!
//! Configuration is layered with the `config` crate: built-in defaults,
//! then a TOML file, then `ORCHESTRATOR_*` environment variables. Every
//! section exposes `validate()`, which runs once at load time.

pub mod models;

pub use models::*;

#[cfg(test)]
mod config_test;
