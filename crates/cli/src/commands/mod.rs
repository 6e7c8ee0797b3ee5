//! Subcommand implementations

pub mod simulate;
pub mod status;
pub mod window;
