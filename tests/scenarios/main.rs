//! Scenario tests: whole release runs against in-memory collaborators

mod helpers;

mod branch_sync;
mod change_gating;
mod failure_handling;
mod guard_rejection;
mod republish;
mod trigger_filter;
