//! Multi-tab task manager.
//!
//! Keeps at most `maxConcurrentTasks` task loops running, one per tab, and
//! reacts to tab lifecycle signals.

pub mod error;
pub mod manager;
pub mod model;
pub mod runtime;

pub use error::ManagerError;
pub use manager::MultiTabManager;
pub use model::{SettingsPatch, StartTask};
pub use runtime::{LoopHandle, LoopRegistry};
