use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Rule parameters as sent over the wire. Required keys depend on the rule type
/// (see `crate::validate::required_param_keys`).
pub type RuleParams = BTreeMap<String, serde_json::Value>;

/// A monitored data source. Owned and mutated by the remote service only.
///
/// Timestamps are kept as the server rendered them; the service emits naive UTC
/// ISO-8601 strings, not RFC3339.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dataset {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner_id: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Completeness,
    Freshness,
    Uniqueness,
    OutlierRate,
    DistributionDrift,
}

impl RuleType {
    pub const ALL: [RuleType; 5] = [
        RuleType::Completeness,
        RuleType::Freshness,
        RuleType::Uniqueness,
        RuleType::OutlierRate,
        RuleType::DistributionDrift,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Completeness => "completeness",
            RuleType::Freshness => "freshness",
            RuleType::Uniqueness => "uniqueness",
            RuleType::OutlierRate => "outlier_rate",
            RuleType::DistributionDrift => "distribution_drift",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| {
                AppError::validation("RULE_TYPE_UNKNOWN", "Unknown rule type")
                    .with_details(format!("rule_type={s}"))
            })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Info, Severity::Warning, Severity::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|v| v.as_str() == s.trim())
            .ok_or_else(|| {
                AppError::validation("RULE_SEVERITY_UNKNOWN", "Unknown severity")
                    .with_details(format!("severity={s}"))
            })
    }
}

/// A check applied to a dataset. Immutable once created by this client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub id: i64,
    pub dataset_id: i64,
    pub rule_type: RuleType,
    pub params: RuleParams,
    pub threshold: f64,
    pub severity: Severity,
    pub enabled: bool,
    pub created_at: String,
}

/// Body of `POST /rules`. `id` and `created_at` are assigned by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRule {
    pub dataset_id: i64,
    pub rule_type: RuleType,
    pub params: RuleParams,
    pub threshold: f64,
    pub severity: Severity,
    pub enabled: bool,
}

/// Rule form input before parameter derivation: one column field regardless of rule type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleDraft {
    pub dataset_id: i64,
    pub rule_type: RuleType,
    pub column: String,
    pub threshold: f64,
    pub severity: Severity,
    pub enabled: bool,
}

impl Default for RuleDraft {
    fn default() -> Self {
        Self {
            dataset_id: 0,
            rule_type: RuleType::Completeness,
            column: String::new(),
            threshold: 0.1,
            severity: Severity::Warning,
            enabled: true,
        }
    }
}

/// A rule evaluation raised by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub id: i64,
    pub dataset_id: i64,
    pub rule_id: i64,
    pub created_at: String,
    pub metric_value: f64,
    pub passed: bool,
    /// Copy of the originating rule's severity at evaluation time.
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    Unacknowledged,
    /// Terminal.
    Acknowledged,
}

impl Incident {
    pub fn state(&self) -> IncidentState {
        if self.acknowledged {
            IncidentState::Acknowledged
        } else {
            IncidentState::Unacknowledged
        }
    }
}

/// Server-side filter for `GET /incidents`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentFilter {
    pub dataset_id: Option<i64>,
    pub rule_id: Option<i64>,
    pub acknowledged: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl IncidentFilter {
    pub fn for_dataset(dataset_id: i64) -> Self {
        Self {
            dataset_id: Some(dataset_id),
            ..Self::default()
        }
    }

    pub fn unacknowledged() -> Self {
        Self {
            acknowledged: Some(false),
            ..Self::default()
        }
    }

    /// Query parameters in a fixed order; unset fields are omitted.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(v) = self.dataset_id {
            out.push(("dataset_id", v.to_string()));
        }
        if let Some(v) = self.rule_id {
            out.push(("rule_id", v.to_string()));
        }
        if let Some(v) = self.acknowledged {
            out.push(("acknowledged", v.to_string()));
        }
        if let Some(v) = self.limit {
            out.push(("limit", v.to_string()));
        }
        if let Some(v) = self.offset {
            out.push(("offset", v.to_string()));
        }
        out
    }
}

/// Bearer token plus the identifier it was issued to.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub identifier: String,
    pub token: String,
    pub refresh_token: Option<String>,
    /// RFC3339 UTC time the credential was stored.
    pub saved_at: Option<String>,
}

impl Credential {
    pub fn new(identifier: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            token: token.into(),
            refresh_token: None,
            saved_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    /// Value of the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

// Tokens must never end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identifier", &self.identifier)
            .field("token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("saved_at", &self.saved_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_type_wire_names_round_trip_through_from_str() {
        for t in RuleType::ALL {
            assert_eq!(t.as_str().parse::<RuleType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert_eq!(
            "schema_drift".parse::<RuleType>().unwrap_err().code,
            "RULE_TYPE_UNKNOWN"
        );
    }

    #[test]
    fn incident_decodes_server_payload() {
        let raw = r#"{
            "id": 7, "dataset_id": 1, "rule_id": 3,
            "created_at": "2024-05-01T10:00:00.123456",
            "metric_value": 0.25, "passed": false, "severity": "critical",
            "description": "null rate above threshold", "acknowledged": false
        }"#;
        let inc: Incident = serde_json::from_str(raw).unwrap();
        assert_eq!(inc.id, 7);
        assert_eq!(inc.severity, Severity::Critical);
        assert_eq!(inc.state(), IncidentState::Unacknowledged);
    }

    #[test]
    fn filter_omits_unset_fields() {
        let f = IncidentFilter {
            rule_id: Some(4),
            acknowledged: Some(false),
            ..IncidentFilter::default()
        };
        assert_eq!(
            f.query_pairs(),
            vec![("rule_id", "4".to_string()), ("acknowledged", "false".to_string())]
        );
        assert!(IncidentFilter::default().query_pairs().is_empty());
    }

    #[test]
    fn credential_debug_redacts_token() {
        let c = Credential::new("ops@example.com", "secret-token")
            .with_refresh_token(Some("refresh".to_string()));
        let out = format!("{c:?}");
        assert!(!out.contains("secret-token"));
        assert!(!out.contains("\"refresh\""));
        assert_eq!(c.bearer(), "Bearer secret-token");
    }
}
