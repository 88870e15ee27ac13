#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod commands;
pub mod telemetry;

pub use commands::{execute, Cli, Command};
