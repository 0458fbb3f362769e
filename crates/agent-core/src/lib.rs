//! Agent core: action parsing, collaborator ports and the per-tab task loop.
//!
//! A [`TaskLoop`] drives one tab: it extracts the page, asks the remote
//! reasoning service for the next step, executes it and records history in
//! the shared state center until the task leaves `running`.

pub mod action;
pub mod errors;
pub mod heartbeat;
pub mod parser;
pub mod ports;
pub mod task_loop;

pub use action::{ActionExecutors, ActionKind, ActionOutcome, DomAction};
pub use errors::{AgentError, ParseError, RemoteServiceError};
pub use heartbeat::{Heartbeat, HeartbeatLease, Pulse};
pub use parser::{parse, parse_action, parse_response, try_parse_response};
pub use ports::{
    AutomationHook, ChainRunner, DomActionExecutor, DomActionOutcome, GenericActionExecutor,
    InteractRequest, InteractResponse, PageExtractor, PageFormat, PageRepresentation,
    ReasoningService, TabInfo,
};
pub use task_loop::{TaskLoop, TaskLoopConfig, TaskLoopDeps, TaskLoopResult};
