use std::sync::Arc;

use idqp_core::domain::{Dataset, NewRule, Rule, RuleDraft};
use idqp_core::error::AppError;
use idqp_core::merge::find_by_id;
use idqp_core::validate::build_new_rule;
use parking_lot::Mutex;

use super::{log_failure, FetchTickets};
use crate::api::QualityApi;
use crate::in_flight::InFlight;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Busy {
    Rules,
    Datasets,
    Create,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleView {
    pub rules: Vec<Rule>,
    /// Choices for the form's dataset selector.
    pub datasets: Vec<Dataset>,
    pub dataset_filter: Option<i64>,
    pub loaded: bool,
    pub loading: bool,
    pub creating: bool,
    /// Input of the last rejected submission, kept for correction.
    pub draft: Option<RuleDraft>,
    pub error: Option<AppError>,
}

#[derive(Debug, Default)]
struct State {
    rules: Vec<Rule>,
    datasets: Vec<Dataset>,
    datasets_loaded: bool,
    dataset_filter: Option<i64>,
    loaded: bool,
    tickets: FetchTickets,
    draft: Option<RuleDraft>,
    error: Option<AppError>,
}

pub struct RuleController {
    api: Arc<dyn QualityApi>,
    state: Mutex<State>,
    busy: InFlight<Busy>,
}

impl RuleController {
    pub fn new(api: Arc<dyn QualityApi>) -> Self {
        Self {
            api,
            state: Mutex::new(State::default()),
            busy: InFlight::new(),
        }
    }

    pub fn view(&self) -> RuleView {
        let s = self.state.lock();
        RuleView {
            rules: s.rules.clone(),
            datasets: s.datasets.clone(),
            dataset_filter: s.dataset_filter,
            loaded: s.loaded,
            loading: self.busy.contains(&Busy::Rules) || self.busy.contains(&Busy::Datasets),
            creating: self.busy.contains(&Busy::Create),
            draft: s.draft.clone(),
            error: s.error.clone(),
        }
    }

    /// Load the dataset choices and the rule list.
    pub fn load(&self) -> Result<(), AppError> {
        self.load_datasets()?;
        self.refresh()
    }

    pub fn load_datasets(&self) -> Result<(), AppError> {
        let _busy = self.busy.begin(Busy::Datasets);
        let res = self.api.list_datasets();
        let mut s = self.state.lock();
        match res {
            Ok(datasets) => {
                s.datasets = datasets;
                s.datasets_loaded = true;
                Ok(())
            }
            Err(e) => {
                log_failure("list_datasets", &e);
                s.error = Some(e.clone());
                Err(e)
            }
        }
    }

    pub fn filter_by_dataset(&self, dataset_id: Option<i64>) -> Result<(), AppError> {
        self.state.lock().dataset_filter = dataset_id;
        self.refresh()
    }

    pub fn refresh(&self) -> Result<(), AppError> {
        let (ticket, dataset_id) = {
            let mut s = self.state.lock();
            (s.tickets.issue(), s.dataset_filter)
        };
        let _busy = self.busy.begin(Busy::Rules);
        let res = self.api.list_rules(dataset_id);

        let mut s = self.state.lock();
        match res {
            Ok(rules) => {
                if s.tickets.accept(ticket) {
                    s.rules = rules;
                    s.loaded = true;
                    s.error = None;
                }
                Ok(())
            }
            Err(e) => {
                log_failure("list_rules", &e);
                // A failure older than the shown state is dropped.
                if s.tickets.accept(ticket) {
                    s.error = Some(e.clone());
                }
                Err(e)
            }
        }
    }

    /// Validate the form locally, submit it, then re-fetch the list so ids and timestamps
    /// come from the server.
    ///
    /// A rejected draft is kept in the view for correction. Invalid input never reaches the
    /// network.
    pub fn create(&self, draft: RuleDraft) -> Result<Rule, AppError> {
        let input = match self.prepare(&draft) {
            Ok(input) => input,
            Err(e) => return Err(self.reject(draft, e)),
        };

        let created = {
            let _busy = self.busy.begin(Busy::Create);
            self.api.create_rule(&input)
        };
        let created = match created {
            Ok(rule) => rule,
            Err(e) => {
                log_failure("create_rule", &e);
                return Err(self.reject(draft, e));
            }
        };

        {
            let mut s = self.state.lock();
            s.draft = None;
            s.error = None;
        }
        // The rule exists now; a failed re-fetch is recorded in the view, not reported as a
        // failed creation.
        let _ = self.refresh();
        Ok(created)
    }

    fn prepare(&self, draft: &RuleDraft) -> Result<NewRule, AppError> {
        let input = build_new_rule(draft)?;
        let s = self.state.lock();
        if s.datasets_loaded && find_by_id(&s.datasets, input.dataset_id).is_none() {
            return Err(AppError::validation(
                "RULE_DATASET_UNKNOWN",
                "Selected dataset does not exist",
            )
            .with_details(format!("dataset_id={}", input.dataset_id)));
        }
        Ok(input)
    }

    fn reject(&self, draft: RuleDraft, err: AppError) -> AppError {
        let mut s = self.state.lock();
        s.draft = Some(draft);
        s.error = Some(err.clone());
        err
    }
}
