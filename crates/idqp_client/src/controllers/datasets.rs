use std::sync::Arc;

use idqp_core::domain::Dataset;
use idqp_core::error::AppError;
use idqp_core::merge::upsert_by_id;
use parking_lot::Mutex;

use super::{log_failure, FetchTickets};
use crate::api::QualityApi;
use crate::in_flight::InFlight;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetView {
    pub datasets: Vec<Dataset>,
    pub selected: Option<Dataset>,
    pub loaded: bool,
    pub loading: bool,
    pub error: Option<AppError>,
}

#[derive(Debug, Default)]
struct State {
    datasets: Vec<Dataset>,
    selected: Option<Dataset>,
    loaded: bool,
    tickets: FetchTickets,
    error: Option<AppError>,
}

pub struct DatasetController {
    api: Arc<dyn QualityApi>,
    state: Mutex<State>,
    fetching: InFlight<()>,
}

impl DatasetController {
    pub fn new(api: Arc<dyn QualityApi>) -> Self {
        Self {
            api,
            state: Mutex::new(State::default()),
            fetching: InFlight::new(),
        }
    }

    pub fn view(&self) -> DatasetView {
        let s = self.state.lock();
        DatasetView {
            datasets: s.datasets.clone(),
            selected: s.selected.clone(),
            loaded: s.loaded,
            loading: !self.fetching.is_empty(),
            error: s.error.clone(),
        }
    }

    pub fn refresh(&self) -> Result<(), AppError> {
        let ticket = self.state.lock().tickets.issue();
        let _busy = self.fetching.begin(());
        let res = self.api.list_datasets();

        let mut s = self.state.lock();
        match res {
            Ok(datasets) => {
                if s.tickets.accept(ticket) {
                    s.datasets = datasets;
                    s.loaded = true;
                    s.error = None;
                }
                Ok(())
            }
            Err(e) => {
                log_failure("list_datasets", &e);
                // A failure older than the shown state is dropped.
                if s.tickets.accept(ticket) {
                    s.error = Some(e.clone());
                }
                Err(e)
            }
        }
    }

    /// Fetch one dataset and make it the selection.
    pub fn open(&self, id: i64) -> Result<Dataset, AppError> {
        let res = self.api.get_dataset(id);
        let mut s = self.state.lock();
        match res {
            Ok(dataset) => {
                s.selected = Some(dataset.clone());
                upsert_by_id(&mut s.datasets, dataset.clone());
                Ok(dataset)
            }
            Err(e) => {
                log_failure("get_dataset", &e);
                s.error = Some(e.clone());
                Err(e)
            }
        }
    }
}
