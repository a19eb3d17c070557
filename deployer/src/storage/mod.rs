//! Local and remote storage layout

pub mod layout;
