//! Requests for editors: what the catalog is missing, issued once per cycle.
//!
//! Policy for an unanswered request: it is superseded by the next one, and
//! asks that are still relevant carry over with their original
//! `first_asked_at`, so editors never see the same question twice. When the
//! cycle consumed editor entries the open request counts as answered. An
//! unchanged request younger than the configured interval is left alone.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::Result;
use crate::feedback::{Ask, FeedbackQueue, FeedbackRequest, RequestStatus};
use crate::model::SourceRecord;
use crate::snapshot::write_atomic;

pub const REQUEST_NOTES: &str =
    "Please review AI source coverage and suggest business policy additions.";

/// Thresholds used to find gaps in the catalog.
#[derive(Debug, Clone)]
pub struct GapPolicy {
    pub expected_topics: Vec<String>,
    pub min_sources_per_topic: usize,
    pub minimum_score: f64,
}

/// Asks derived from the committed catalog, in a stable order.
pub fn plan_asks(records: &[SourceRecord], policy: &GapPolicy, now: DateTime<Utc>) -> Vec<Ask> {
    let consumable: Vec<&SourceRecord> = records.iter().filter(|r| r.is_consumable()).collect();
    let mut asks = Vec::new();
    let mut ask = |key: String, question: String| {
        asks.push(Ask {
            key,
            question,
            first_asked_at: now,
        })
    };

    if consumable.is_empty() {
        ask(
            "empty-catalog".to_string(),
            "The catalog has no active sources; please propose sources to add.".to_string(),
        );
    }

    for topic in &policy.expected_topics {
        let count = consumable
            .iter()
            .filter(|r| r.topics.contains(topic))
            .count();
        if count < policy.min_sources_per_topic {
            ask(
                format!("topic:{}", topic),
                format!(
                    "Topic '{}' has {} active source(s); please suggest at least {} more.",
                    topic,
                    count,
                    policy.min_sources_per_topic - count
                ),
            );
        }
    }

    for record in &consumable {
        if let Some(limit) = record.cadence.stale_after() {
            if now - record.last_modified > limit {
                ask(
                    format!("stale:{}", record.source_id),
                    format!(
                        "'{}' ({}) is a {} source unchanged since {}; is it still worth following?",
                        record.name,
                        record.source_id,
                        record.cadence.as_str(),
                        record.last_modified.format("%Y-%m-%d")
                    ),
                );
            }
        }
        let mean = record.mean_score();
        if mean < policy.minimum_score {
            ask(
                format!("low-score:{}", record.source_id),
                format!(
                    "'{}' ({}) averages {:.2}, below {:.2}; boost or retire it?",
                    record.name, record.source_id, mean, policy.minimum_score
                ),
            );
        }
    }

    asks
}

/// What happened to the request file this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    Issued,
    /// The open request is recent and unchanged.
    Kept,
}

impl FeedbackQueue {
    pub fn open_request(&self) -> Option<&FeedbackRequest> {
        self.document
            .requests
            .iter()
            .rev()
            .find(|r| r.status == RequestStatus::Open)
    }

    /// Close the open request (answered or superseded) and append a new one.
    pub fn issue_request(
        &mut self,
        mut asks: Vec<Ask>,
        answered: bool,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> RequestDecision {
        if let Some(open) = self.open_request() {
            let same_asks = open.asks.len() == asks.len()
                && open.asks.iter().zip(&asks).all(|(a, b)| a.key == b.key);
            if !answered && same_asks && now - open.requested_at < interval {
                info!("Feedback already requested on {}", open.requested_at);
                return RequestDecision::Kept;
            }

            if !answered {
                let carried: HashMap<&str, DateTime<Utc>> = open
                    .asks
                    .iter()
                    .map(|a| (a.key.as_str(), a.first_asked_at))
                    .collect();
                for ask in &mut asks {
                    if let Some(first) = carried.get(ask.key.as_str()) {
                        ask.first_asked_at = *first;
                    }
                }
            }
        }

        let closed = if answered {
            RequestStatus::Answered
        } else {
            RequestStatus::Superseded
        };
        for request in &mut self.document.requests {
            if request.status == RequestStatus::Open {
                request.status = closed;
            }
        }

        self.document.requests.push(FeedbackRequest {
            requested_at: now,
            notes: REQUEST_NOTES.to_string(),
            status: RequestStatus::Open,
            asks,
        });
        self.document.last_request_iso = Some(now);
        RequestDecision::Issued
    }
}

/// Short guide for editors on how to answer a request.
pub fn write_editor_notes(path: &Path, feedback_path: &Path) -> Result<()> {
    let guide = format!(
        r#"# Researcher feedback loop

Add entries to the `responses` array of `{feedback}`. Each entry needs
`submitted_at` (RFC 3339), `action` and, except for `add`, the target
`source_id`. Actions and their payloads:

- `add`: `name`, `url`, `ingestion_type` (`rss`, `html`, `manual`), `cadence`
  (`daily`, `weekly`, `ad-hoc`), `credibility_score`, `visitor_score`,
  `business_alignment`, `topics`
- `boost`: optional `delta`
- `retire` (or `remove`): no payload
- `retag`: `topics`
- `adjust`: any of the `add` fields

```json
{{
  "submitted_at": "2024-05-10T08:00:00+00:00",
  "source_id": "new_source",
  "action": "add",
  "payload": {{
    "name": "Example AI",
    "url": "https://example.com/rss",
    "ingestion_type": "rss",
    "credibility_score": 0.7,
    "visitor_score": 0.6,
    "business_alignment": 0.8,
    "topics": ["business"],
    "cadence": "weekly"
  }}
}}
```

Open questions from the curator are listed under `requests`.
"#,
        feedback = feedback_path.display()
    );
    write_atomic(path, &guide)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cadence, IngestionType, Score, SourceStatus};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn policy() -> GapPolicy {
        GapPolicy {
            expected_topics: vec!["business".to_string(), "policy".to_string()],
            min_sources_per_topic: 1,
            minimum_score: 0.6,
        }
    }

    fn record(id: &str, topics: &[&str], cadence: Cadence, score: f64) -> SourceRecord {
        SourceRecord {
            source_id: id.to_string(),
            name: id.to_uppercase(),
            url: format!("https://{}.example.com", id),
            ingestion_type: IngestionType::FeedPull,
            cadence,
            credibility_score: Score::new(score).unwrap(),
            visitor_score: Score::new(score).unwrap(),
            business_alignment: Score::new(score).unwrap(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            status: SourceStatus::Active,
            last_modified: now() - Duration::days(1),
        }
    }

    fn keys(asks: &[Ask]) -> Vec<&str> {
        asks.iter().map(|a| a.key.as_str()).collect()
    }

    mod plan_tests {
        use super::*;

        #[test]
        fn test_empty_catalog() {
            let asks = plan_asks(&[], &policy(), now());
            assert_eq!(
                keys(&asks),
                vec!["empty-catalog", "topic:business", "topic:policy"]
            );
        }

        #[test]
        fn test_covered_catalog_has_no_asks() {
            let records = vec![record("a", &["business", "policy"], Cadence::Daily, 0.8)];
            assert!(plan_asks(&records, &policy(), now()).is_empty());
        }

        #[test]
        fn test_retired_sources_do_not_count() {
            let mut retired = record("a", &["business", "policy"], Cadence::Daily, 0.8);
            retired.status = SourceStatus::Retired;
            let asks = plan_asks(&[retired], &policy(), now());
            assert!(keys(&asks).contains(&"topic:business"));
        }

        #[test]
        fn test_stale_and_low_score() {
            let mut stale = record("old", &["business", "policy"], Cadence::Daily, 0.8);
            stale.last_modified = now() - Duration::days(30);
            let mut ad_hoc = record("rare", &["business"], Cadence::AdHoc, 0.8);
            ad_hoc.last_modified = now() - Duration::days(365);
            let weak = record("weak", &["policy"], Cadence::Weekly, 0.3);

            let asks = plan_asks(&[stale, ad_hoc, weak], &policy(), now());
            assert_eq!(keys(&asks), vec!["stale:old", "low-score:weak"]);
        }
    }

    mod issue_tests {
        use super::*;

        fn ask(key: &str, at: DateTime<Utc>) -> Ask {
            Ask {
                key: key.to_string(),
                question: format!("about {}", key),
                first_asked_at: at,
            }
        }

        #[test]
        fn test_first_request_is_issued() {
            let mut queue = FeedbackQueue::in_memory();
            let decision = queue.issue_request(vec![], false, Duration::days(7), now());
            assert_eq!(decision, RequestDecision::Issued);
            assert_eq!(queue.requests().len(), 1);
            assert_eq!(queue.open_request().unwrap().notes, REQUEST_NOTES);
            assert_eq!(queue.document().last_request_iso, Some(now()));
        }

        #[test]
        fn test_recent_unchanged_request_is_kept() {
            let mut queue = FeedbackQueue::in_memory();
            queue.issue_request(vec![ask("topic:policy", now())], false, Duration::days(7), now());
            let later = now() + Duration::days(2);
            let decision = queue.issue_request(
                vec![ask("topic:policy", later)],
                false,
                Duration::days(7),
                later,
            );
            assert_eq!(decision, RequestDecision::Kept);
            assert_eq!(queue.requests().len(), 1);
        }

        #[test]
        fn test_unanswered_request_is_superseded_with_merge() {
            let mut queue = FeedbackQueue::in_memory();
            queue.issue_request(vec![ask("topic:policy", now())], false, Duration::days(7), now());

            let later = now() + Duration::days(2);
            queue.issue_request(
                vec![ask("topic:policy", later), ask("stale:x", later)],
                false,
                Duration::days(7),
                later,
            );

            let requests = queue.requests();
            assert_eq!(requests.len(), 2);
            assert_eq!(requests[0].status, RequestStatus::Superseded);
            let open = queue.open_request().unwrap();
            assert_eq!(open.asks.len(), 2);
            assert_eq!(open.asks[0].first_asked_at, now());
            assert_eq!(open.asks[1].first_asked_at, later);
        }

        #[test]
        fn test_answered_request_closes() {
            let mut queue = FeedbackQueue::in_memory();
            queue.issue_request(vec![ask("topic:policy", now())], false, Duration::days(7), now());

            let later = now() + Duration::days(1);
            queue.issue_request(
                vec![ask("topic:policy", later)],
                true,
                Duration::days(7),
                later,
            );

            let requests = queue.requests();
            assert_eq!(requests[0].status, RequestStatus::Answered);
            assert_eq!(requests[1].asks[0].first_asked_at, later);
            assert_eq!(
                requests
                    .iter()
                    .filter(|r| r.status == RequestStatus::Open)
                    .count(),
                1
            );
        }

        #[test]
        fn test_old_unchanged_request_is_reissued() {
            let mut queue = FeedbackQueue::in_memory();
            queue.issue_request(vec![], false, Duration::days(7), now());
            let later = now() + Duration::days(8);
            let decision = queue.issue_request(vec![], false, Duration::days(7), later);
            assert_eq!(decision, RequestDecision::Issued);
            assert_eq!(queue.requests()[0].status, RequestStatus::Superseded);
        }
    }

    #[test]
    fn test_write_editor_notes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs").join("FEEDBACK.md");
        write_editor_notes(&path, Path::new("data/feedback.json")).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("data/feedback.json"));
        assert!(content.contains("\"action\": \"add\""));
    }
}
