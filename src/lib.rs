pub mod cli;
pub mod glance;
pub mod load_config;

pub use cli::{run, Cli, Commands};
