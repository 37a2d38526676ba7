//! Core domain models for release pipelines
//!
//! This module defines the fundamental data structures that represent
//! pipelines, jobs, their gates, and the state of a run.

pub mod condition;
pub mod config;
pub mod context;
pub mod filter;
pub mod job;
pub mod pipeline;
pub mod secret;
pub mod state;

pub use context::*;
pub use job::*;
pub use pipeline::*;
pub use state::*;
