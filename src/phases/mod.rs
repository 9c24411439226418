//! Files produced by the phases of a job.

pub mod output;
