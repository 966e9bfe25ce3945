//! CLI subcommand implementations.

pub mod close;
pub mod notify;
pub mod ping;
pub mod request;
pub mod tunnel;
