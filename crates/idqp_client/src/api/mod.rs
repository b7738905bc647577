use std::collections::HashSet;

use idqp_core::domain::{Dataset, Incident, IncidentFilter, NewRule, Rule};
use idqp_core::error::AppError;
use idqp_core::validate::INCIDENT_PAGE_MAX;

pub mod remote;

/// Remote capabilities the view controllers depend on.
pub trait QualityApi: Send + Sync {
    fn list_datasets(&self) -> Result<Vec<Dataset>, AppError>;

    fn get_dataset(&self, id: i64) -> Result<Dataset, AppError>;

    /// All rules visible to the caller, or only those of `dataset_id`.
    fn list_rules(&self, dataset_id: Option<i64>) -> Result<Vec<Rule>, AppError>;

    fn get_rule(&self, id: i64) -> Result<Rule, AppError>;

    fn create_rule(&self, input: &NewRule) -> Result<Rule, AppError>;

    fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, AppError>;

    fn get_incident(&self, id: i64) -> Result<Incident, AppError>;

    /// Returns the updated incident. An incident that is already acknowledged is reported by
    /// the service as a conflict.
    fn acknowledge_incident(&self, id: i64, comment: Option<&str>) -> Result<Incident, AppError>;
}

/// Walk the incident listing page by page until a short page comes back.
///
/// Stops early when a page brings no incident not already seen (a backend ignoring `offset`
/// would otherwise repeat the first page forever) or when the offset would overflow.
pub fn list_all_incidents(api: &dyn QualityApi, filter: &IncidentFilter) -> Result<Vec<Incident>, AppError> {
    let page_size = INCIDENT_PAGE_MAX;
    let mut offset = filter.offset.unwrap_or(0);
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    loop {
        let page = api.list_incidents(&IncidentFilter {
            limit: Some(page_size),
            offset: Some(offset),
            ..filter.clone()
        })?;
        let len = page.len();
        let before = out.len();
        out.extend(page.into_iter().filter(|i| seen.insert(i.id)));
        if len < page_size as usize {
            break;
        }
        if out.len() == before {
            tracing::warn!(offset, "incident paging made no progress; stopping");
            break;
        }
        match offset.checked_add(page_size) {
            Some(next) => offset = next,
            None => break,
        }
    }

    Ok(out)
}
