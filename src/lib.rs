//! Supervision core for a single managed process: clear its port, spawn it
//! detached, restart it on crash, on request or on code change, and take it
//! down gracefully (then forcibly) when the supervisor exits.

pub mod config;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod pidfile;
pub mod port;
pub mod signals;
pub mod state_machine;
pub mod supervisor;
pub mod watch;

pub use config::SupervisionConfig;
pub use error::SupervisorError;
pub use supervisor::Supervisor;
