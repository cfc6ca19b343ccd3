//! devmanager: Self-updating launcher for DevAutomator
//!
//! Provides the `devmanager` binary: the launch [`orchestrator`], the
//! detached self-update helper entry point, and token and configuration
//! management commands.

pub mod backoff;
pub mod commands;
pub mod exit;
pub mod logging;
pub mod orchestrator;
pub mod output;

pub use exit::ExitStatus;
pub use orchestrator::Orchestrator;
