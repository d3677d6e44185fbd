//! View models returned by joined queries.
//!
//! Plain entities live in `crate::model`; the structs here only exist because a
//! query returns more than one entity per row.

use crate::model::{Booking, User};

/// A booking whose class starts inside the notification window, together with
/// the user who owns it.
#[derive(Debug, Clone)]
pub struct DueBooking {
    pub booking: Booking,
    pub user: User,
}

/// Page selector for list queries ordered by sequence id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl PageRequest {
    pub fn of(page: u32, size: u32, direction: SortDirection) -> Self {
        Self {
            page,
            size,
            direction,
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }
}
