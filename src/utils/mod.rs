//! Shared helpers for paths, file writes and external processes.

pub mod exec;
pub mod fs;
pub mod path;
