use std::sync::Arc;

use idqp_core::analytics::{build_overview, OverviewSummary};
use idqp_core::domain::IncidentFilter;
use idqp_core::error::AppError;
use parking_lot::Mutex;

use super::{log_failure, FetchTickets};
use crate::api::{list_all_incidents, QualityApi};
use crate::in_flight::InFlight;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverviewView {
    pub summary: Option<OverviewSummary>,
    pub loading: bool,
    pub error: Option<AppError>,
}

#[derive(Debug, Default)]
struct State {
    summary: Option<OverviewSummary>,
    tickets: FetchTickets,
    error: Option<AppError>,
}

/// Counts for the landing page, recomputed from full collections on every refresh.
pub struct OverviewController {
    api: Arc<dyn QualityApi>,
    state: Mutex<State>,
    fetching: InFlight<()>,
}

impl OverviewController {
    pub fn new(api: Arc<dyn QualityApi>) -> Self {
        Self {
            api,
            state: Mutex::new(State::default()),
            fetching: InFlight::new(),
        }
    }

    pub fn view(&self) -> OverviewView {
        let s = self.state.lock();
        OverviewView {
            summary: s.summary.clone(),
            loading: !self.fetching.is_empty(),
            error: s.error.clone(),
        }
    }

    pub fn refresh(&self) -> Result<OverviewSummary, AppError> {
        let ticket = self.state.lock().tickets.issue();
        let _busy = self.fetching.begin(());

        let res = self.fetch();

        let mut s = self.state.lock();
        match res {
            Ok(summary) => {
                if s.tickets.accept(ticket) {
                    s.summary = Some(summary.clone());
                    s.error = None;
                }
                Ok(summary)
            }
            Err(e) => {
                log_failure("overview", &e);
                // A failure older than the shown state is dropped.
                if s.tickets.accept(ticket) {
                    s.error = Some(e.clone());
                }
                Err(e)
            }
        }
    }

    fn fetch(&self) -> Result<OverviewSummary, AppError> {
        let incidents = list_all_incidents(self.api.as_ref(), &IncidentFilter::default())?;
        let datasets = self.api.list_datasets()?;
        let rules = self.api.list_rules(None)?;
        Ok(build_overview(&datasets, &rules, &incidents))
    }
}
