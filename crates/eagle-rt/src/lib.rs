//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Runtime helpers supporting the gateway bridge."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
//! Scheduling helpers for the discovery and polling loops.

pub mod scheduling;

pub use scheduling::{FixedDelaySchedule, ScheduleHandle};
