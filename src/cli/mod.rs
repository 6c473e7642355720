mod commands;
pub mod http_client;
mod lease;

pub use commands::{ClientArgs, LeaseCommands};
pub use lease::run_lease;
