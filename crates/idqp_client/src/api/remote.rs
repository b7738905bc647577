use idqp_core::domain::{Credential, Dataset, Incident, IncidentFilter, NewRule, Rule};
use idqp_core::error::AppError;
use idqp_core::session::Authenticator;
use idqp_core::validate::{validate_incident_filter, validate_new_rule};
use serde::{Deserialize, Serialize};

use super::QualityApi;
use crate::http::{ApiClient, Call};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct AcknowledgeRequest<'a> {
    comment: Option<&'a str>,
}

impl Authenticator for ApiClient {
    fn authenticate(&self, identifier: &str, secret: &str) -> Result<Credential, AppError> {
        let call = Call::post("authenticate", "/auth/login").public();
        let body = LoginRequest {
            email: identifier,
            password: secret,
        };
        let tokens: TokenResponse = self.execute(&call, Some(&body))?;
        Ok(Credential::new(identifier, tokens.access_token).with_refresh_token(tokens.refresh_token))
    }

    fn refresh(&self, credential: &Credential) -> Result<Credential, AppError> {
        let refresh_token = credential.refresh_token.as_deref().unwrap_or_default();
        let call = Call::post("refresh", "/auth/refresh").public();
        let tokens: TokenResponse = self.execute(&call, Some(&RefreshRequest { refresh_token }))?;
        Ok(Credential::new(credential.identifier.clone(), tokens.access_token)
            .with_refresh_token(tokens.refresh_token))
    }
}

impl QualityApi for ApiClient {
    fn list_datasets(&self) -> Result<Vec<Dataset>, AppError> {
        self.execute(&Call::get("list_datasets", "/datasets"), None::<&()>)
    }

    fn get_dataset(&self, id: i64) -> Result<Dataset, AppError> {
        self.execute(&Call::get("get_dataset", format!("/datasets/{id}")), None::<&()>)
    }

    fn list_rules(&self, dataset_id: Option<i64>) -> Result<Vec<Rule>, AppError> {
        let query = dataset_id
            .map(|id| vec![("dataset_id", id.to_string())])
            .unwrap_or_default();
        self.execute(&Call::get("list_rules", "/rules").query(query), None::<&()>)
    }

    fn get_rule(&self, id: i64) -> Result<Rule, AppError> {
        self.execute(&Call::get("get_rule", format!("/rules/{id}")), None::<&()>)
    }

    fn create_rule(&self, input: &NewRule) -> Result<Rule, AppError> {
        validate_new_rule(input)?;
        let rule: Rule = self.execute(&Call::post("create_rule", "/rules"), Some(input))?;
        tracing::info!(rule_id = rule.id, dataset_id = rule.dataset_id, rule_type = %rule.rule_type, "rule created");
        Ok(rule)
    }

    fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, AppError> {
        validate_incident_filter(filter)?;
        self.execute(
            &Call::get("list_incidents", "/incidents").query(filter.query_pairs()),
            None::<&()>,
        )
    }

    fn get_incident(&self, id: i64) -> Result<Incident, AppError> {
        self.execute(&Call::get("get_incident", format!("/incidents/{id}")), None::<&()>)
    }

    fn acknowledge_incident(&self, id: i64, comment: Option<&str>) -> Result<Incident, AppError> {
        let call = Call::post("acknowledge_incident", format!("/incidents/{id}/acknowledge"));
        let incident: Incident = self.execute(&call, Some(&AcknowledgeRequest { comment }))?;
        tracing::info!(incident_id = incident.id, "incident acknowledged");
        Ok(incident)
    }
}
