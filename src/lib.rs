// src/lib.rs
// crate: auto-head-unit-agent
// summary: the core engine behind an Android Automotive UI-testing agent —
// capture a screen, resolve a described element to a coordinate, act on the
// device, verify the result, and learn from it. No HTTP surface lives here;
// `agentctl` (src/bin) and any future request layer are thin callers of
// `Orchestrator`.

pub mod config;
pub mod controller;
pub mod device;
pub mod domain;
pub mod error;
pub mod graph;
pub mod history;
pub mod knowledge;
pub mod orchestrator;
pub mod verify;
pub mod vision;

pub use config::AgentConfig;
pub use controller::ExecutionController;
pub use error::{AgentError, AgentResult};
pub use orchestrator::{Orchestrator, RunResult, StatusSnapshot};
