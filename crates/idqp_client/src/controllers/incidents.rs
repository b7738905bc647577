use std::sync::Arc;

use idqp_core::domain::{Incident, IncidentFilter};
use idqp_core::error::{AppError, ErrorKind};
use idqp_core::merge::{find_by_id, merge_incident_fetch, replace_by_id};
use parking_lot::Mutex;

use super::{log_failure, FetchTickets};
use crate::api::QualityApi;
use crate::in_flight::InFlight;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentView {
    pub incidents: Vec<Incident>,
    pub filter: IncidentFilter,
    pub selected: Option<Incident>,
    pub loaded: bool,
    pub loading: bool,
    /// Ids with an acknowledgement awaiting the backend, ascending.
    pub acknowledging: Vec<i64>,
    pub error: Option<AppError>,
    /// Non-fatal outcome worth telling the user about (already acknowledged, gone, ...).
    pub notice: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    Acknowledged(Incident),
    /// Nothing to do: the incident was acknowledged before this call.
    AlreadyAcknowledged,
    /// Another acknowledgement of the same incident has not resolved yet.
    InFlight,
}

#[derive(Debug, Default)]
struct State {
    incidents: Vec<Incident>,
    filter: IncidentFilter,
    selected: Option<Incident>,
    loaded: bool,
    tickets: FetchTickets,
    error: Option<AppError>,
    notice: Option<String>,
}

impl State {
    fn is_acknowledged(&self, id: i64) -> bool {
        find_by_id(&self.incidents, id)
            .or(self.selected.as_ref().filter(|s| s.id == id))
            .is_some_and(|i| i.acknowledged)
    }

    /// Apply a server copy to the list entry and the selection holding the same id. The list
    /// only gains incidents through `refresh`, so one outside the filter stays out. Returns the
    /// stored copy.
    fn apply(&mut self, mut incoming: Incident) -> Incident {
        if self.is_acknowledged(incoming.id) {
            incoming.acknowledged = true;
        }
        if self.selected.as_ref().is_some_and(|s| s.id == incoming.id) {
            self.selected = Some(incoming.clone());
        }
        replace_by_id(&mut self.incidents, incoming.clone());
        incoming
    }

    fn mark_acknowledged(&mut self, id: i64) {
        for inc in self.incidents.iter_mut().filter(|i| i.id == id) {
            inc.acknowledged = true;
        }
        if let Some(sel) = self.selected.as_mut().filter(|s| s.id == id) {
            sel.acknowledged = true;
        }
    }
}

pub struct IncidentController {
    api: Arc<dyn QualityApi>,
    state: Mutex<State>,
    fetching: InFlight<()>,
    acknowledging: InFlight<i64>,
}

impl IncidentController {
    pub fn new(api: Arc<dyn QualityApi>) -> Self {
        Self {
            api,
            state: Mutex::new(State::default()),
            fetching: InFlight::new(),
            acknowledging: InFlight::new(),
        }
    }

    pub fn view(&self) -> IncidentView {
        let s = self.state.lock();
        let mut acknowledging = self.acknowledging.keys();
        acknowledging.sort_unstable();
        IncidentView {
            incidents: s.incidents.clone(),
            filter: s.filter.clone(),
            selected: s.selected.clone(),
            loaded: s.loaded,
            loading: !self.fetching.is_empty(),
            acknowledging,
            error: s.error.clone(),
            notice: s.notice.clone(),
        }
    }

    pub fn is_acknowledging(&self, id: i64) -> bool {
        self.acknowledging.contains(&id)
    }

    pub fn set_filter(&self, filter: IncidentFilter) -> Result<(), AppError> {
        self.state.lock().filter = filter;
        self.refresh()
    }

    /// Re-fetch the list with the current filter.
    pub fn refresh(&self) -> Result<(), AppError> {
        let (ticket, filter) = {
            let mut s = self.state.lock();
            (s.tickets.issue(), s.filter.clone())
        };
        let _busy = self.fetching.begin(());
        let res = self.api.list_incidents(&filter);

        let mut s = self.state.lock();
        match res {
            Ok(fetched) => {
                if !s.tickets.accept(ticket) {
                    tracing::debug!(ticket, "dropping superseded incident list");
                    return Ok(());
                }
                s.incidents = merge_incident_fetch(&s.incidents, fetched);
                let reselected = s
                    .selected
                    .as_ref()
                    .and_then(|sel| find_by_id(&s.incidents, sel.id))
                    .cloned();
                if reselected.is_some() {
                    s.selected = reselected;
                }
                s.loaded = true;
                s.error = None;
                Ok(())
            }
            Err(e) => {
                log_failure("list_incidents", &e);
                // A failure older than the shown state is dropped.
                if s.tickets.accept(ticket) {
                    s.error = Some(e.clone());
                }
                Err(e)
            }
        }
    }

    /// Select an incident already in the list.
    pub fn select(&self, id: i64) -> Option<Incident> {
        let mut s = self.state.lock();
        let found = find_by_id(&s.incidents, id).cloned();
        if found.is_some() {
            s.selected = found.clone();
        }
        found
    }

    pub fn clear_selection(&self) {
        self.state.lock().selected = None;
    }

    pub fn dismiss_notice(&self) {
        self.state.lock().notice = None;
    }

    /// Fetch one incident's current state and show it as the selection.
    pub fn open(&self, id: i64) -> Result<Incident, AppError> {
        let res = self.api.get_incident(id);
        let mut s = self.state.lock();
        match res {
            Ok(incident) => {
                let shown = s.apply(incident);
                s.selected = Some(shown.clone());
                Ok(shown)
            }
            Err(e) => {
                log_failure("get_incident", &e);
                if e.is(ErrorKind::NotFound) {
                    s.notice = Some(format!("Incident #{id} no longer exists"));
                } else {
                    s.error = Some(e.clone());
                }
                Err(e)
            }
        }
    }

    pub fn acknowledge_selected(&self, comment: Option<&str>) -> Result<AckOutcome, AppError> {
        let id = self
            .state
            .lock()
            .selected
            .as_ref()
            .map(|s| s.id)
            .ok_or_else(|| AppError::validation("INCIDENT_NOT_SELECTED", "Select an incident first"))?;
        self.acknowledge(id, comment)
    }

    /// Acknowledge one incident and apply the server's copy to the list and selection.
    ///
    /// The per-incident in-flight entry is held for exactly the duration of the backend call.
    pub fn acknowledge(&self, id: i64, comment: Option<&str>) -> Result<AckOutcome, AppError> {
        if self.state.lock().is_acknowledged(id) {
            return Ok(AckOutcome::AlreadyAcknowledged);
        }
        let Some(_claim) = self.acknowledging.try_begin(id) else {
            tracing::debug!(incident_id = id, "acknowledge already in flight");
            return Ok(AckOutcome::InFlight);
        };

        let res = self.api.acknowledge_incident(id, comment);

        let mut s = self.state.lock();
        match res {
            Ok(updated) => {
                let updated = s.apply(updated);
                s.error = None;
                Ok(AckOutcome::Acknowledged(updated))
            }
            Err(e) if e.is(ErrorKind::Conflict) => {
                // The backend only reports a conflict for incidents that are already acknowledged.
                s.mark_acknowledged(id);
                s.notice = Some(format!("Incident #{id} was already acknowledged"));
                Ok(AckOutcome::AlreadyAcknowledged)
            }
            Err(e) => {
                log_failure("acknowledge_incident", &e);
                if e.is(ErrorKind::NotFound) {
                    s.notice = Some(format!("Incident #{id} no longer exists"));
                } else {
                    s.error = Some(e.clone());
                }
                Err(e)
            }
        }
    }
}
