//! Typed feedback actions. Each variant carries exactly the fields its action
//! needs, and validation is a match over the variant.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::EntryError;
use crate::feedback::FeedbackEntry;
use crate::model::{
    validate_name, validate_topics, validate_url, Cadence, IngestionType, Score, SourceDefinition,
};

pub const ACTIONS: [&str; 5] = ["add", "boost", "retire", "retag", "adjust"];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "lowercase")]
pub enum FeedbackAction {
    Add(SourceDefinition),
    Boost(BoostPayload),
    Retire(RetirePayload),
    Retag(RetagPayload),
    Adjust(AdjustPayload),
}

impl FeedbackAction {
    pub fn name(&self) -> &'static str {
        match self {
            FeedbackAction::Add(_) => "add",
            FeedbackAction::Boost(_) => "boost",
            FeedbackAction::Retire(_) => "retire",
            FeedbackAction::Retag(_) => "retag",
            FeedbackAction::Adjust(_) => "adjust",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BoostPayload {
    /// Overrides the configured boost delta.
    #[serde(default)]
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RetirePayload {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetagPayload {
    #[serde(alias = "tags")]
    pub topics: BTreeSet<String>,
}

/// Absolute replacements for any subset of a record's attributes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AdjustPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ingestion_type: Option<IngestionType>,
    #[serde(default)]
    pub cadence: Option<Cadence>,
    #[serde(default, alias = "credibility")]
    pub credibility_score: Option<Score>,
    #[serde(default, alias = "visitor")]
    pub visitor_score: Option<Score>,
    #[serde(default, alias = "alignment")]
    pub business_alignment: Option<Score>,
    #[serde(default, alias = "tags")]
    pub topics: Option<BTreeSet<String>>,
}

impl AdjustPayload {
    pub fn is_empty(&self) -> bool {
        *self == AdjustPayload::default()
    }
}

/// An entry that passed validation, ready to be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEntry {
    /// The record the action targets; for `add`, the requested identifier.
    pub target: Option<String>,
    pub action: FeedbackAction,
}

fn invalid(message: impl Into<String>) -> EntryError {
    EntryError::Validation(message.into())
}

/// Check an entry's shape and payload for its action.
pub fn validate(entry: &FeedbackEntry, max_boost_delta: f64) -> Result<ValidatedEntry, EntryError> {
    if entry.submitted_at().is_none() {
        return Err(invalid(format!(
            "submitted_at '{}' is not an RFC 3339 timestamp",
            entry.submitted_at
        )));
    }

    let action_name = entry.normalized_action();
    if action_name.is_empty() {
        return Err(invalid("action is missing"));
    }
    if !ACTIONS.contains(&action_name.as_str()) {
        return Err(invalid(format!("unknown action '{}'", entry.action)));
    }

    let payload = match &entry.payload {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    let action: FeedbackAction =
        serde_json::from_value(json!({ "action": action_name, "payload": payload }))
            .map_err(|e| invalid(format!("invalid {} payload: {}", action_name, e)))?;

    let explicit_target = entry
        .source_id
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let require_target = || {
        explicit_target
            .clone()
            .ok_or_else(|| invalid(format!("{} requires a source_id", action_name)))
    };

    let target = match &action {
        FeedbackAction::Add(definition) => {
            definition.validate().map_err(invalid)?;
            definition
                .source_id
                .as_ref()
                .map(|s| s.trim().to_string())
                .or(explicit_target.clone())
        }
        FeedbackAction::Boost(payload) => {
            if let Some(delta) = payload.delta {
                if !(delta.is_finite() && delta > 0.0 && delta <= max_boost_delta) {
                    return Err(invalid(format!(
                        "boost delta {} must be within (0, {}]",
                        delta, max_boost_delta
                    )));
                }
            }
            Some(require_target()?)
        }
        FeedbackAction::Retire(_) => Some(require_target()?),
        FeedbackAction::Retag(payload) => {
            validate_topics(&payload.topics).map_err(invalid)?;
            Some(require_target()?)
        }
        FeedbackAction::Adjust(payload) => {
            if payload.is_empty() {
                return Err(invalid("adjust payload changes nothing"));
            }
            if let Some(name) = &payload.name {
                validate_name(name).map_err(invalid)?;
            }
            if let Some(url) = &payload.url {
                validate_url(url).map_err(invalid)?;
            }
            if let Some(topics) = &payload.topics {
                validate_topics(topics).map_err(invalid)?;
            }
            Some(require_target()?)
        }
    };

    Ok(ValidatedEntry { target, action })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source_id: Option<&str>, action: &str, payload: Value) -> FeedbackEntry {
        FeedbackEntry {
            submitted_at: "2024-05-10T08:00:00+00:00".to_string(),
            source_id: source_id.map(String::from),
            action: action.to_string(),
            payload,
            rationale: None,
        }
    }

    fn add_payload() -> Value {
        json!({
            "name": "Example AI",
            "url": "https://example.com/rss",
            "ingestion_type": "rss",
            "credibility_score": 0.7,
            "visitor_score": 0.6,
            "business_alignment": 0.8,
            "topics": ["business"],
            "cadence": "weekly"
        })
    }

    fn rejection(entry: &FeedbackEntry) -> String {
        match validate(entry, 0.25) {
            Err(EntryError::Validation(message)) => message,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    mod add_tests {
        use super::*;

        #[test]
        fn test_valid_add() {
            let validated = validate(&entry(Some("new_source"), "add", add_payload()), 0.25).unwrap();
            assert_eq!(validated.target.as_deref(), Some("new_source"));
            match validated.action {
                FeedbackAction::Add(def) => {
                    assert_eq!(def.name, "Example AI");
                    assert_eq!(def.ingestion_type, IngestionType::FeedPull);
                }
                other => panic!("unexpected action {:?}", other),
            }
        }

        #[test]
        fn test_add_without_target_gets_none() {
            let validated = validate(&entry(None, "add", add_payload()), 0.25).unwrap();
            assert!(validated.target.is_none());
        }

        #[test]
        fn test_payload_source_id_wins() {
            let mut payload = add_payload();
            payload["source_id"] = json!("from_payload");
            let validated = validate(&entry(Some("from_entry"), "add", payload), 0.25).unwrap();
            assert_eq!(validated.target.as_deref(), Some("from_payload"));
        }

        #[test]
        fn test_add_missing_field() {
            let mut payload = add_payload();
            payload.as_object_mut().unwrap().remove("url");
            let message = rejection(&entry(None, "add", payload));
            assert!(message.contains("url"), "{}", message);
        }

        #[test]
        fn test_add_score_out_of_range() {
            let mut payload = add_payload();
            payload["credibility_score"] = json!(1.7);
            rejection(&entry(None, "add", payload));
        }

        #[test]
        fn test_add_without_topics() {
            let mut payload = add_payload();
            payload["topics"] = json!([]);
            rejection(&entry(None, "add", payload));
        }
    }

    mod action_tests {
        use super::*;

        #[test]
        fn test_boost_requires_target() {
            let message = rejection(&entry(None, "boost", Value::Null));
            assert!(message.contains("source_id"));
        }

        #[test]
        fn test_boost_delta_bounds() {
            assert!(validate(&entry(Some("a"), "boost", json!({"delta": 0.1})), 0.25).is_ok());
            rejection(&entry(Some("a"), "boost", json!({"delta": 0.0})));
            rejection(&entry(Some("a"), "boost", json!({"delta": 0.5})));
        }

        #[test]
        fn test_remove_is_retire() {
            let validated = validate(&entry(Some("a"), "Remove", Value::Null), 0.25).unwrap();
            assert_eq!(validated.action, FeedbackAction::Retire(RetirePayload {}));
            assert_eq!(validated.action.name(), "retire");
            assert_eq!(validated.target.as_deref(), Some("a"));
        }

        #[test]
        fn test_retag_requires_tags() {
            rejection(&entry(Some("a"), "retag", json!({"topics": []})));
            rejection(&entry(Some("a"), "retag", Value::Null));
            let validated =
                validate(&entry(Some("a"), "retag", json!({"tags": ["policy"]})), 0.25).unwrap();
            assert_eq!(validated.action.name(), "retag");
        }

        #[test]
        fn test_adjust_must_change_something() {
            rejection(&entry(Some("a"), "adjust", json!({})));
            rejection(&entry(Some("a"), "adjust", json!({"url": "nope"})));
            let validated = validate(
                &entry(Some("a"), "adjust", json!({"credibility_score": 0.95})),
                0.25,
            )
            .unwrap();
            match validated.action {
                FeedbackAction::Adjust(p) => {
                    assert_eq!(p.credibility_score, Some(Score::new(0.95).unwrap()))
                }
                other => panic!("unexpected action {:?}", other),
            }
        }

        #[test]
        fn test_unknown_action() {
            let message = rejection(&entry(Some("a"), "promote", Value::Null));
            assert!(message.contains("promote"));
            rejection(&entry(Some("a"), "", Value::Null));
        }

        #[test]
        fn test_bad_timestamp() {
            let mut bad = entry(Some("a"), "retire", Value::Null);
            bad.submitted_at = "last tuesday".to_string();
            let message = rejection(&bad);
            assert!(message.contains("submitted_at"));
        }
    }
}
