//! Asset daemon: local task orchestration between the asset plugin and the
//! marketplace.

pub mod config;
pub mod error;
pub mod jobs;
pub mod remote;
pub mod server;
pub mod tasks;
pub mod upload;
pub mod watchdog;
