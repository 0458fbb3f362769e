//! Per-tab observe, plan, act driver.

mod config;
mod controller;
mod types;

pub use config::TaskLoopConfig;
pub use controller::{TaskLoop, TaskLoopDeps};
pub use types::TaskLoopResult;
