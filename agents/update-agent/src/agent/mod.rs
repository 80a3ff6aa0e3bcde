//! Agent module
//!
//! This module contains the core agent functionality: the per-command state
//! machine, the command handler, the version reporter and the command loop.

pub mod handler;
pub mod reporter;
pub mod runner;
pub mod state;
