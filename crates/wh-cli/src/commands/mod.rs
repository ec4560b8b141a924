//! CLI subcommand implementations.

pub mod close_all;
pub mod report;
pub mod sessions;
pub mod status;
pub mod submit;
