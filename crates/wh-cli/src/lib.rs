//! Work-hour tracker daemon and CLI.
//!
//! The `wh` binary runs the tracking daemon and talks to it over local HTTP.

pub mod api;
mod cli;
pub mod client;
pub mod commands;
mod config;
pub mod daemon;

pub use cli::{Cli, Commands, SessionsAction};
pub use config::{Config, ProducersConfig, TrackingConfig};
