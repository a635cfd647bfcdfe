//! cm-cli: Command-line interface for the CM2 conversational CAD client
//!
//! Provides the `cm2` binary for interactive sessions, benchmark runs and
//! configuration management.

pub mod commands;
pub mod output;
