//! Screen-level state holders. Each controller keeps the last data it fetched, what is
//! currently loading, and the last error, and applies server responses keyed by entity id so
//! calls may complete in any order.

pub mod datasets;
pub mod incidents;
pub mod overview;
pub mod rules;

pub use datasets::{DatasetController, DatasetView};
pub use incidents::{AckOutcome, IncidentController, IncidentView};
pub use overview::{OverviewController, OverviewView};
pub use rules::{RuleController, RuleView};

use idqp_core::error::AppError;

/// Orders overlapping fetches of the same collection: only a response newer than the one
/// already applied may replace it.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FetchTickets {
    issued: u64,
    applied: u64,
}

impl FetchTickets {
    pub fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    pub fn accept(&mut self, ticket: u64) -> bool {
        if ticket > self.applied {
            self.applied = ticket;
            true
        } else {
            false
        }
    }
}

pub(crate) fn log_failure(op: &'static str, err: &AppError) {
    tracing::warn!(op, kind = err.kind.as_str(), code = %err.code, "operation failed");
}
