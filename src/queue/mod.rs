/// Task Queue Layer
///
/// Durable run queue and recurring schedules on SQLite. Workers poll it; the
/// trigger scheduler and the runner are its only writers.

// Job, run record and schedule types
pub mod job;

// Enqueue, claim, complete, fail
pub mod task_queue;

pub use job::{Job, JobRecord, JobStatus, NewJob, Schedule};
pub use task_queue::TaskQueue;
