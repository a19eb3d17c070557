//! Application entry points

pub mod options;
pub mod prompt;
pub mod run;
