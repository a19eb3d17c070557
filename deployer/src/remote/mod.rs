//! Remote host access

pub mod executor;
pub mod shell;
pub mod step;
pub mod target;
