//! Scheduled maintenance jobs for gym membership passes.
//!
//! Each job is a list of steps run by [`batch::JobLauncher`]; every run is
//! recorded in the run-history tables.

pub mod batch;
pub mod config;
pub mod db;
pub mod jobs;
pub mod model;
pub mod notifier;
