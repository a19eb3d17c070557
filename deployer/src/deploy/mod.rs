//! Deployment module

pub mod compose;
pub mod docker;
pub mod fsm;
pub mod git;
pub mod provision;
pub mod proxy;
pub mod runner;
pub mod sync;
pub mod validate;
