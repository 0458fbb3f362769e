//! tabflow library
//!
//! Configuration, the command channel and the HTTP collaborators behind the
//! `tabflow` binary; exposed for integration testing.

pub mod app;
pub mod channel;
pub mod commands;
pub mod config;
pub mod http;

pub use app::{Collaborators, Orchestrator};
pub use channel::serve_lines;
pub use commands::{Command, CommandResponse, CommandRouter};
pub use config::{load_config, AppConfig, IgnoredOverride, LoadedConfig, LogFormat};
pub use http::{HttpBrowserBridge, HttpReasoningClient};
