//! Database module: view models and SQL repositories.
//!
//! - `model`: view models and paging types returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Callers import from `pass_batch::db`; the repository API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{DueBooking, PageRequest, SortDirection};
