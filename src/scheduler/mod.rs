//! Scheduling and dispatch.
//!
//! [`core::Scheduler`] (reachable here as [`Scheduler`]) plus
//! [`adapter::Adapter`] are the job-store-backed engine: calendar-driven
//! recurring jobs and one-shots, submitted to a [`crate::pool::WorkerPool`]
//! and dispatched over a [`crate::bus::MessageBus`].
//!
//! [`legacy`] is the older, narrower heartbeat + `cron_jobs.json` +
//! janitor system the rest of this crate (tool handlers, gateway
//! routes, slash commands) still talks to directly for agent liveness
//! and config-declared recurring messages — re-exported here at the
//! top level so those call sites are unaffected by the engine above.

pub mod adapter;
pub mod calendar;
pub mod core;
pub mod legacy;

pub use adapter::{adapter_ref, set_adapter, Adapter};
pub use core::{check_oneshots, Scheduler};
pub use legacy::*;
