use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Dataset, Incident, Rule, Severity};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityCount {
    pub severity: Severity,
    pub count: i64,
    pub incident_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverviewSummary {
    pub dataset_count: i64,
    pub rule_count: i64,
    pub incident_count: i64,
    pub unacknowledged_count: i64,
    pub severity_counts: Vec<SeverityCount>,
}

/// Group incidents by severity. Rows come out ordered by severity and ids ascending within a
/// row, so the result only depends on the set of incidents, never on their order.
pub fn severity_counts(incidents: &[Incident]) -> Vec<SeverityCount> {
    let mut by_severity: BTreeMap<Severity, Vec<i64>> = BTreeMap::new();
    for inc in incidents {
        by_severity.entry(inc.severity).or_default().push(inc.id);
    }

    by_severity
        .into_iter()
        .map(|(severity, mut incident_ids)| {
            incident_ids.sort_unstable();
            SeverityCount {
                severity,
                count: incident_ids.len() as i64,
                incident_ids,
            }
        })
        .collect()
}

pub fn build_overview(datasets: &[Dataset], rules: &[Rule], incidents: &[Incident]) -> OverviewSummary {
    OverviewSummary {
        dataset_count: datasets.len() as i64,
        rule_count: rules.len() as i64,
        incident_count: incidents.len() as i64,
        unacknowledged_count: incidents.iter().filter(|i| !i.acknowledged).count() as i64,
        severity_counts: severity_counts(incidents),
    }
}
