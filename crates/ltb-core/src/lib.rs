//! Core domain + application logic for the link tracker bot.
//!
//! This crate is framework-agnostic. Telegram and SQLite live behind ports
//! (traits) implemented in adapter crates.

pub mod bot;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod tracking;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use errors::{Error, Result};
