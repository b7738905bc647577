use serde_json::Value;

use crate::domain::{IncidentFilter, NewRule, RuleDraft, RuleParams, RuleType};
use crate::error::AppError;

/// Parameter shape of one rule type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleParamSpec {
    pub rule_type: RuleType,
    /// Keys that must be present; every one is filled from the form's single column field.
    pub required: &'static [&'static str],
    /// Keys the service understands but this client never derives.
    pub optional: &'static [&'static str],
    /// Upper bound for ratio-valued metrics; `None` when the metric is unbounded.
    pub threshold_max: Option<f64>,
}

pub static RULE_PARAM_TABLE: [RuleParamSpec; 5] = [
    RuleParamSpec {
        rule_type: RuleType::Completeness,
        required: &["column"],
        optional: &[],
        threshold_max: Some(1.0),
    },
    RuleParamSpec {
        rule_type: RuleType::Freshness,
        required: &["column", "timestamp_column"],
        optional: &[],
        threshold_max: None,
    },
    RuleParamSpec {
        rule_type: RuleType::Uniqueness,
        required: &["primary_key"],
        optional: &[],
        threshold_max: Some(1.0),
    },
    RuleParamSpec {
        rule_type: RuleType::OutlierRate,
        required: &["column"],
        optional: &[],
        threshold_max: Some(1.0),
    },
    RuleParamSpec {
        rule_type: RuleType::DistributionDrift,
        required: &["column"],
        optional: &["reference_mean"],
        threshold_max: None,
    },
];

pub const INCIDENT_PAGE_MAX: u32 = 100;

pub fn param_spec(rule_type: RuleType) -> &'static RuleParamSpec {
    let row = match rule_type {
        RuleType::Completeness => 0,
        RuleType::Freshness => 1,
        RuleType::Uniqueness => 2,
        RuleType::OutlierRate => 3,
        RuleType::DistributionDrift => 4,
    };
    &RULE_PARAM_TABLE[row]
}

pub fn required_param_keys(rule_type: RuleType) -> &'static [&'static str] {
    param_spec(rule_type).required
}

/// Build `params` for a rule type from the single form column.
pub fn derive_params(rule_type: RuleType, column: &str) -> RuleParams {
    required_param_keys(rule_type)
        .iter()
        .map(|k| (k.to_string(), Value::String(column.to_string())))
        .collect()
}

/// Check a params map against the table: required keys present as non-empty strings,
/// no keys outside required/optional, and freshness' two columns naming the same field.
pub fn validate_params(rule_type: RuleType, params: &RuleParams) -> Result<(), AppError> {
    let spec = param_spec(rule_type);

    for key in spec.required {
        match params.get(*key) {
            None => {
                return Err(AppError::validation(
                    "RULE_PARAM_MISSING",
                    format!("Rule type {rule_type} requires parameter {key}"),
                ))
            }
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(other) => {
                return Err(AppError::validation(
                    "RULE_PARAM_INVALID",
                    format!("Parameter {key} must be a non-empty column name"),
                )
                .with_details(format!("value={other}")))
            }
        }
    }

    if let Some(extra) = params
        .keys()
        .find(|k| !spec.required.contains(&k.as_str()) && !spec.optional.contains(&k.as_str()))
    {
        return Err(AppError::validation(
            "RULE_PARAM_UNEXPECTED",
            format!("Parameter {extra} is not accepted for rule type {rule_type}"),
        ));
    }

    if rule_type == RuleType::Freshness && params.get("column") != params.get("timestamp_column") {
        return Err(AppError::validation(
            "RULE_PARAM_INVALID",
            "Freshness rules must check the same column as their timestamp_column",
        ));
    }

    Ok(())
}

pub fn validate_threshold(rule_type: RuleType, threshold: f64) -> Result<(), AppError> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(
            AppError::validation("RULE_THRESHOLD_INVALID", "Threshold must be a finite, non-negative number")
                .with_details(format!("threshold={threshold}")),
        );
    }
    if let Some(max) = param_spec(rule_type).threshold_max {
        if threshold > max {
            return Err(AppError::validation(
                "RULE_THRESHOLD_OUT_OF_RANGE",
                format!("Threshold for {rule_type} is a ratio and must be <= {max}"),
            )
            .with_details(format!("threshold={threshold}")));
        }
    }
    Ok(())
}

pub fn validate_new_rule(rule: &NewRule) -> Result<(), AppError> {
    if rule.dataset_id <= 0 {
        return Err(AppError::validation(
            "RULE_DATASET_REQUIRED",
            "A dataset must be selected",
        )
        .with_details(format!("dataset_id={}", rule.dataset_id)));
    }
    validate_threshold(rule.rule_type, rule.threshold)?;
    validate_params(rule.rule_type, &rule.params)
}

/// Turn form input into a request body, rejecting anything the service would refuse.
pub fn build_new_rule(draft: &RuleDraft) -> Result<NewRule, AppError> {
    let column = draft.column.trim();
    if column.is_empty() {
        return Err(AppError::validation(
            "RULE_COLUMN_REQUIRED",
            format!("Rule type {} requires a column name", draft.rule_type),
        ));
    }

    let rule = NewRule {
        dataset_id: draft.dataset_id,
        rule_type: draft.rule_type,
        params: derive_params(draft.rule_type, column),
        threshold: draft.threshold,
        severity: draft.severity,
        enabled: draft.enabled,
    };
    validate_new_rule(&rule)?;
    Ok(rule)
}

pub fn validate_incident_filter(filter: &IncidentFilter) -> Result<(), AppError> {
    if let Some(limit) = filter.limit {
        if limit == 0 || limit > INCIDENT_PAGE_MAX {
            return Err(AppError::validation(
                "INCIDENT_FILTER_LIMIT_OUT_OF_RANGE",
                format!("limit must be between 1 and {INCIDENT_PAGE_MAX}"),
            )
            .with_details(format!("limit={limit}")));
        }
    }
    Ok(())
}
