//! # Dispatch Core
//!
//! The moving parts between a submitted job and its caller's handle.
//!
//! * [`queue`] - The shared admission queue. Submitters push jobs without
//!   blocking; workers wait on it for batches of up to `mini_batch` jobs.
//!
//! * [`worker`] - One long-lived task per execution device. Each runs its
//!   pipeline on the batches it pops and emits one completion per job.
//!
//! * [`registry`] - The map of in-flight jobs. Completions arrive over a
//!   channel and are matched to the waiting handle by job id, exactly once.
//!
//! Only the queue and the registry are shared mutable state, and both keep
//! their critical sections to a single collection operation.
pub mod queue;
pub mod registry;
pub mod worker;
