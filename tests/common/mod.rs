//! Common test utilities and fixtures for checkd integration tests
//!
//! This module provides:
//! - `TestProject` builder for creating throwaway Python projects
//! - `RunningDaemon` for driving a supervisor on a private socket directory
//! - `Client` for speaking the line protocol

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod client;
pub mod daemon;
pub mod test_project;

pub use client::Client;
pub use daemon::{EventLog, RunningDaemon};
pub use test_project::TestProject;
