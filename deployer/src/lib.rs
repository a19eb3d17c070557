//! ajdeploy library
//!
//! Stages a git repository, mirrors it to a remote host over ssh, provisions
//! the host and runs the application in containers behind nginx.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod process;
pub mod remote;
pub mod storage;
pub mod utils;
