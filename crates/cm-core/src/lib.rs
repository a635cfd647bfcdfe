//! cm-core: Core abstractions and configuration for the CM2 client
//!
//! This crate provides shared types, the error taxonomy, the transport and
//! backend traits, and configuration structures used by the client library
//! and the CLI.

pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::CmError;
pub use types::{ConnectionState, ExpectationKind, ExportFormat, TestCase};
