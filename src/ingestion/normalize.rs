//! Turns a raw form-provider webhook payload into spreadsheet columns.
//!
//! The provider posts a flat object of routing metadata with the actual
//! answers nested under [`CONTAINER_KEY`], either as an object or as a
//! JSON-encoded string.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Key of the nested object holding the submitted answers.
pub const CONTAINER_KEY: &str = "rawRequest";

/// Top-level provider metadata that never becomes a column.
const METADATA_FIELDS: &[&str] = &[
    "action",
    "appID",
    "customBody",
    "customParams",
    "customTitleColumns",
    "documentID",
    "event",
    "formID",
    "formTitle",
    "fromTable",
    "ip",
    "isSilent",
    "parent",
    "pretty",
    "product",
    "rawRequest",
    "subject",
    "submissionID",
    "teamID",
    "type",
    "unread",
    "username",
    "webhookURL",
];

/// Form-tool bookkeeping fields found inside the container.
const INTERNAL_FIELDS: &[&str] = &[
    "buildDate",
    "event_id",
    "eventObserver",
    "formID",
    "jsExecutionTracker",
    "path",
    "slug",
    "submissionID",
    "submitDate",
    "submitSource",
    "timeToSubmit",
    "uploadServerUrl",
    "validatedNewRequiredFieldIDs",
    "website",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no 'rawRequest' container")]
    MissingContainer,
    #[error("'rawRequest' container is not a JSON object")]
    InvalidContainer,
}

/// A webhook payload split into top-level metadata and the answer container.
#[derive(Debug, Clone)]
pub struct SubmissionPayload {
    top_level: Map<String, Value>,
    container: Map<String, Value>,
}

impl SubmissionPayload {
    pub fn parse(raw: &[u8]) -> Result<Self, PayloadError> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        let Value::Object(mut top_level) = value else {
            return Err(PayloadError::NotAnObject);
        };

        let container = match top_level.remove(CONTAINER_KEY) {
            None | Some(Value::Null) => return Err(PayloadError::MissingContainer),
            Some(Value::Object(map)) => map,
            Some(Value::String(encoded)) => match serde_json::from_str(&encoded) {
                Ok(Value::Object(map)) => map,
                _ => return Err(PayloadError::InvalidContainer),
            },
            Some(_) => return Err(PayloadError::InvalidContainer),
        };

        Ok(Self {
            top_level,
            container,
        })
    }

    /// The provider's own id for this submission, if it sent one.
    pub fn submission_id(&self) -> Option<String> {
        match self.top_level.get("submissionID")? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Column name to rendered value, with metadata removed and empty
    /// values dropped.
    pub fn normalize(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();

        for (name, value) in &self.container {
            if INTERNAL_FIELDS.contains(&name.as_str()) {
                continue;
            }
            let rendered = render(value);
            if rendered.trim().is_empty() {
                continue;
            }
            fields
                .entry(strip_question_prefix(name).to_string())
                .or_insert(rendered);
        }

        for (name, value) in &self.top_level {
            if METADATA_FIELDS.contains(&name.as_str()) {
                continue;
            }
            let rendered = render(value);
            if rendered.trim().is_empty() {
                continue;
            }
            // Answers from the container win over same-named top-level fields.
            fields.entry(name.clone()).or_insert(rendered);
        }

        fields
    }
}

/// Sorted header field list for a normalized submission.
pub fn header_fields(fields: &BTreeMap<String, String>) -> Vec<String> {
    fields.keys().cloned().collect()
}

/// `q12_email` -> `email`. Names not following the convention are kept.
pub fn strip_question_prefix(name: &str) -> &str {
    let Some(rest) = name.strip_prefix('q') else {
        return name;
    };
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return name;
    }
    match rest[digits..].strip_prefix('_') {
        Some(field) if !field.is_empty() => field,
        _ => name,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Object(map) => render_date(map).unwrap_or_else(|| flatten(value)),
        other => flatten(other),
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn pad2(value: &str) -> String {
    format!("{:0>2}", value)
}

/// `{year, month, day}` with optional `{hour, min}`.
fn render_date(map: &Map<String, Value>) -> Option<String> {
    const DATE_KEYS: &[&str] = &["year", "month", "day", "hour", "min"];
    if map.keys().any(|k| !DATE_KEYS.contains(&k.as_str())) {
        return None;
    }

    let part = |key: &str| map.get(key).and_then(scalar).filter(|s| !s.is_empty());
    let year = part("year")?;
    let month = part("month")?;
    let day = part("day")?;
    let date = format!("{}-{}-{}", year, pad2(&month), pad2(&day));

    match (part("hour"), part("min")) {
        (Some(hour), Some(min)) => Some(format!("{} {}:{}", date, pad2(&hour), pad2(&min))),
        _ => Some(date),
    }
}

fn flatten(value: &Value) -> String {
    fn collect(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => map.values().for_each(|v| collect(v, out)),
            Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
            other => {
                if let Some(s) = scalar(other).filter(|s| !s.is_empty()) {
                    out.push(s);
                }
            }
        }
    }

    let mut parts = Vec::new();
    collect(value, &mut parts);
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize(value: Value) -> BTreeMap<String, String> {
        SubmissionPayload::from_value(value).unwrap().normalize()
    }

    #[test]
    fn test_date_flattening() {
        let fields = normalize(json!({
            "rawRequest": {
                "q4_birthday": {"year": "2024", "month": "3", "day": "7"},
                "q6_appointment": {"year": "2024", "month": "3", "day": "7", "hour": "9", "min": "5"},
            }
        }));
        assert_eq!(fields["birthday"], "2024-03-07");
        assert_eq!(fields["appointment"], "2024-03-07 09:05");
    }

    #[test]
    fn test_numeric_date_parts() {
        let fields = normalize(json!({
            "rawRequest": { "q1_when": {"year": 2024, "month": 12, "day": 25} }
        }));
        assert_eq!(fields["when"], "2024-12-25");
    }

    #[test]
    fn test_metadata_stripped() {
        let fields = normalize(json!({
            "submissionID": "5829",
            "formID": "2401",
            "formTitle": "Contact",
            "ip": "10.0.0.1",
            "rawRequest": {
                "slug": "submit/2401",
                "jsExecutionTracker": "build-date",
                "event_id": "1_2_3",
                "q3_name": "Ada",
            }
        }));
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["name"], "Ada");
    }

    #[test]
    fn test_generic_flatten() {
        let fields = normalize(json!({
            "rawRequest": {
                "q2_fullName": {"first": "Ada", "middle": "", "last": "Lovelace"},
                "q8_toppings": ["cheese", "", "olives"],
                "q9_address": {"line": "1 Main St", "region": {"city": "London"}},
            }
        }));
        assert_eq!(fields["fullName"], "Ada, Lovelace");
        assert_eq!(fields["toppings"], "cheese, olives");
        assert_eq!(fields["address"], "1 Main St, London");
    }

    #[test]
    fn test_partial_date_falls_back_to_generic() {
        let fields = normalize(json!({
            "rawRequest": {
                "q4_birthday": {"year": "2024", "month": "", "day": "7"},
                "q5_blank": {"year": "", "month": "", "day": ""},
            }
        }));
        let mut parts: Vec<&str> = fields["birthday"].split(", ").collect();
        parts.sort();
        assert_eq!(parts, vec!["2024", "7"]);
        assert!(!fields.contains_key("blank"));
    }

    #[test]
    fn test_empty_values_dropped() {
        let fields = normalize(json!({
            "rawRequest": {
                "q1_name": "  ",
                "q2_phone": "",
                "q3_notes": null,
                "q4_age": 36,
            }
        }));
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["age"], "36");
    }

    #[test]
    fn test_container_as_string() {
        let payload = SubmissionPayload::from_value(json!({
            "submissionID": 123456,
            "rawRequest": "{\"q3_name\":\"Ada\",\"q5_email\":\"ada@example.com\"}",
        }))
        .unwrap();
        assert_eq!(payload.submission_id().as_deref(), Some("123456"));
        assert_eq!(
            header_fields(&payload.normalize()),
            vec!["email".to_string(), "name".to_string()]
        );
    }

    #[test]
    fn test_top_level_fields_kept_unless_metadata() {
        let fields = normalize(json!({
            "campaign": "spring",
            "name": "top-level",
            "rawRequest": { "q3_name": "Ada" }
        }));
        assert_eq!(fields["campaign"], "spring");
        assert_eq!(fields["name"], "Ada");
    }

    #[test]
    fn test_invalid_payloads() {
        assert_eq!(
            SubmissionPayload::parse(b"{not json").unwrap_err(),
            PayloadError::Malformed(
                serde_json::from_slice::<Value>(b"{not json").unwrap_err().to_string()
            )
        );
        assert_eq!(
            SubmissionPayload::from_value(json!([1, 2])).unwrap_err(),
            PayloadError::NotAnObject
        );
        assert_eq!(
            SubmissionPayload::from_value(json!({"formID": "1"})).unwrap_err(),
            PayloadError::MissingContainer
        );
        assert_eq!(
            SubmissionPayload::from_value(json!({"rawRequest": "nope"})).unwrap_err(),
            PayloadError::InvalidContainer
        );
        assert_eq!(
            SubmissionPayload::from_value(json!({"rawRequest": 5})).unwrap_err(),
            PayloadError::InvalidContainer
        );
    }

    #[test]
    fn test_strip_question_prefix() {
        assert_eq!(strip_question_prefix("q3_name"), "name");
        assert_eq!(strip_question_prefix("q12_first_name"), "first_name");
        assert_eq!(strip_question_prefix("question"), "question");
        assert_eq!(strip_question_prefix("q_name"), "q_name");
        assert_eq!(strip_question_prefix("q3_"), "q3_");
        assert_eq!(strip_question_prefix("q3name"), "q3name");
    }

    #[test]
    fn test_submission_id_absent() {
        let payload = SubmissionPayload::from_value(json!({"rawRequest": {}})).unwrap();
        assert!(payload.submission_id().is_none());
        assert!(payload.normalize().is_empty());
    }
}
