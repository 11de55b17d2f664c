//! I/O adapters for the publish step.

pub mod atomic;
pub mod build_record;
pub mod config;
pub mod env;
pub mod git;
pub mod log_sink;
pub mod process;
