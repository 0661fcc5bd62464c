//! messenger-relay library crate.
//!
//! A Messenger chat bot that answers text through a completion service and
//! fetches videos and generated images through queued, permit-limited jobs.

pub mod api;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod handler;
pub mod logging;
pub mod media;
pub mod panic_hook;
pub mod queue;
pub mod relay;
pub mod services;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
