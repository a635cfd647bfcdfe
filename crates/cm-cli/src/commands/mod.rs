//! CLI command implementations

mod bench;
mod chat;
mod config;
mod status;

pub use bench::{bench_command, load_suite, BenchOptions};
pub use chat::{chat_command, parse_line, ChatCommand};
pub use config::{config_init, config_path, config_show, load as load_config};
pub use status::status_command;
