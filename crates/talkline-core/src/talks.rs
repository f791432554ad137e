//! Flat talk records for programme exports.
//!
//! A [`SimpleTalk`] condenses a [`Talk`] and the answers of its speakers into
//! plain strings: audience levels and prerequisites come from the talk's own
//! answers, the organisation from each speaker's "Company / Institute" answer.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::PretalxClient;
use crate::error::{ExportError, Result};
use crate::models::{Answer, MultiLingualStr, Speaker, Talk};
use crate::transport::QueryParams;

const DOMAIN_QUESTION: &str = "Expected audience expertise: Domain";
const DOMAIN_KEYWORDS: &[&str] = &["expertise: domain", "domain expertise"];
const PYTHON_QUESTION: &str = "Expected audience expertise: Python";
const PYTHON_KEYWORDS: &[&str] = &["expertise: python", "python expertise"];
const PREREQUISITES_QUESTION: &str = "Prerequisites";
const PREREQUISITES_KEYWORDS: &[&str] = &["prerequisite", "requirement"];
const ORGANISATION_QUESTION: &str = "Company / Institute";
const ORGANISATION_KEYWORDS: &[&str] = &["company", "institute", "organisation", "organization", "affiliation"];

/// A talk flattened to strings. Missing information is an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleTalk {
    #[serde(default)]
    pub code: String,
    pub title: String,
    /// Speaker names, comma separated.
    #[serde(default)]
    pub speaker: String,
    #[serde(default)]
    pub organisation: String,
    #[serde(default)]
    pub track: String,
    #[serde(default)]
    pub domain_level: String,
    #[serde(default)]
    pub python_level: String,
    /// Minutes.
    #[serde(default)]
    pub duration: String,
    #[serde(default, rename = "abstract")]
    pub abstract_: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prerequisites: String,
}

impl SimpleTalk {
    /// Fields that come straight from the talk, without looking at answers.
    pub fn from_talk(talk: &Talk) -> Self {
        let submission = &talk.submission;
        Self {
            code: submission.code.clone(),
            title: submission.title.clone(),
            speaker: submission.speaker_names().join(", "),
            track: submission
                .track
                .as_ref()
                .and_then(MultiLingualStr::best)
                .unwrap_or_default()
                .to_string(),
            duration: submission
                .duration
                .map(|minutes| minutes.to_string())
                .unwrap_or_default(),
            abstract_: submission.abstract_.clone().unwrap_or_default(),
            description: submission.description.clone().unwrap_or_default(),
            ..Self::default()
        }
    }
}

/// Where speaker details (with their answers) come from.
pub trait SpeakerLookup {
    fn speaker_with_answers(&self, event_slug: &str, code: &str) -> Result<Speaker>;
}

impl SpeakerLookup for PretalxClient {
    fn speaker_with_answers(&self, event_slug: &str, code: &str) -> Result<Speaker> {
        self.speaker(event_slug, code, &QueryParams::new().with("questions", "all"))
    }
}

/// The answer whose question equals `pattern`, or failing that, whose
/// question contains one of `keywords` (always case-insensitive).
pub fn find_answer_by_pattern<'a>(
    answers: &'a [Answer],
    pattern: &str,
    case_sensitive: bool,
    keywords: &[&str],
) -> Option<&'a str> {
    let pattern_lower = pattern.to_lowercase();
    let matches_exactly = |text: &str| {
        if case_sensitive {
            text == pattern
        } else {
            text.to_lowercase() == pattern_lower
        }
    };

    if !pattern.is_empty() {
        let exact = answers
            .iter()
            .find(|answer| question_text(answer).is_some_and(|text| matches_exactly(text)));
        if let Some(answer) = exact {
            return Some(&answer.answer);
        }
    }

    let keywords: Vec<String> = keywords.iter().map(|keyword| keyword.to_lowercase()).collect();
    answers
        .iter()
        .find(|answer| {
            question_text(answer).is_some_and(|text| {
                let text = text.to_lowercase();
                keywords.iter().any(|keyword| text.contains(keyword.as_str()))
            })
        })
        .map(|answer| answer.answer.as_str())
}

fn question_text(answer: &Answer) -> Option<&str> {
    answer.question.question.best()
}

pub fn extract_expertise_and_prerequisites(talk: &Talk, simple: &mut SimpleTalk) {
    let answers = talk.submission.answers.as_deref().unwrap_or_default();
    let find = |pattern, keywords| {
        find_answer_by_pattern(answers, pattern, false, keywords)
            .unwrap_or_default()
            .to_string()
    };
    simple.domain_level = find(DOMAIN_QUESTION, DOMAIN_KEYWORDS);
    simple.python_level = find(PYTHON_QUESTION, PYTHON_KEYWORDS);
    simple.prerequisites = find(PREREQUISITES_QUESTION, PREREQUISITES_KEYWORDS);
}

/// Fill in the distinct organisations of the talk's speakers.
///
/// `speakers` caches lookups across talks. A speaker that cannot be looked
/// up is logged and skipped.
pub fn extract_organisation<L>(
    talk: &Talk,
    simple: &mut SimpleTalk,
    lookup: &L,
    event_slug: &str,
    speakers: &mut HashMap<String, Speaker>,
) where
    L: SpeakerLookup + ?Sized,
{
    let mut organisations: Vec<String> = Vec::new();
    for speaker in &talk.submission.speakers {
        if !speakers.contains_key(&speaker.code) {
            match lookup.speaker_with_answers(event_slug, &speaker.code) {
                Ok(details) => {
                    speakers.insert(speaker.code.clone(), details);
                }
                Err(err) => {
                    warn!(speaker = %speaker.code, error = %err, "cannot look up speaker organisation");
                    continue;
                }
            }
        }
        let Some(details) = speakers.get(&speaker.code) else {
            continue;
        };
        let answers = details.answers.as_deref().unwrap_or_default();
        let found = find_answer_by_pattern(answers, ORGANISATION_QUESTION, false, ORGANISATION_KEYWORDS);
        if let Some(organisation) = found.map(str::trim).filter(|org| !org.is_empty()) {
            if !organisations.iter().any(|known| known == organisation) {
                organisations.push(organisation.to_string());
            }
        }
    }
    simple.organisation = organisations.join(", ");
}

/// Pretty-printed JSON array of [`SimpleTalk`]s, in the order given.
pub fn talks_to_json<L>(talks: &[Talk], lookup: &L, event_slug: &str) -> Result<String, ExportError>
where
    L: SpeakerLookup + ?Sized,
{
    let mut speakers = HashMap::new();
    let simple_talks: Vec<SimpleTalk> = talks
        .iter()
        .map(|talk| {
            let mut simple = SimpleTalk::from_talk(talk);
            extract_expertise_and_prerequisites(talk, &mut simple);
            extract_organisation(talk, &mut simple, lookup, event_slug, &mut speakers);
            simple
        })
        .collect();
    Ok(serde_json::to_string_pretty(&simple_talks)?)
}

/// Fetch every talk of the event in `state`, with answers, as JSON.
pub fn talks_as_json(client: &PretalxClient, event_slug: &str, state: &str) -> Result<String, ExportError> {
    let params = QueryParams::new()
        .with("questions", "all")
        .with("state", state);
    let talks = client.talks(event_slug, &params)?.into_vec()?;
    info!(event = %event_slug, state, count = talks.len(), "exporting talks");
    talks_to_json(&talks, client, event_slug)
}

pub fn save_talks_to_json(
    client: &PretalxClient,
    event_slug: &str,
    path: &Path,
    state: &str,
) -> Result<(), ExportError> {
    let json = talks_as_json(client, event_slug, state)?;
    fs::write(path, json)?;
    info!(path = %path.display(), "saved talks");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use serde_json::{Value, json};

    use crate::error::ApiError;
    use crate::models::validate_one;

    fn answer(id: i64, question: &str, text: &str) -> Value {
        json!({"id": id, "answer": text, "question": {"id": id, "question": {"en": question}}})
    }

    fn answers(values: Vec<Value>) -> Vec<Answer> {
        values
            .into_iter()
            .map(|value| validate_one(value).expect("valid answer"))
            .collect()
    }

    fn level_answers() -> Vec<Value> {
        vec![
            answer(1, "Expected audience expertise: Domain", "Intermediate"),
            answer(2, "Expected audience expertise: Python", "Advanced"),
            answer(3, "Prerequisites", "Python 3.6+"),
        ]
    }

    fn talk(code: &str, title: &str, speakers: &[(&str, &str)], track: &str, answers: Vec<Value>) -> Talk {
        let speakers: Vec<Value> = speakers
            .iter()
            .map(|(code, name)| json!({"code": code, "name": name}))
            .collect();
        validate_one(json!({
            "code": code,
            "title": title,
            "speakers": speakers,
            "submission_type": {"en": "Talk"},
            "submission_type_id": 1,
            "track": {"en": track},
            "state": "confirmed",
            "abstract": format!("Abstract for {code}"),
            "description": format!("Description for {code}"),
            "duration": 45,
            "answers": answers,
        }))
        .expect("valid talk")
    }

    fn speaker(code: &str, name: &str, organisation: &str) -> Speaker {
        validate_one(json!({
            "code": code,
            "name": name,
            "answers": [answer(10, "Company / Institute", organisation)],
        }))
        .expect("valid speaker")
    }

    #[derive(Default)]
    struct Directory {
        speakers: HashMap<String, Speaker>,
        lookups: Cell<usize>,
    }

    impl Directory {
        fn with(mut self, speaker: Speaker) -> Self {
            self.speakers.insert(speaker.code.clone(), speaker);
            self
        }
    }

    impl SpeakerLookup for Directory {
        fn speaker_with_answers(&self, _event_slug: &str, code: &str) -> Result<Speaker> {
            self.lookups.set(self.lookups.get() + 1);
            self.speakers.get(code).cloned().ok_or_else(|| ApiError::NotFound {
                url: format!("/api/events/demo/speakers/{code}/"),
            })
        }
    }

    #[test]
    fn test_find_answer_by_pattern() {
        let mut values = level_answers();
        values[2] = answer(3, "Prerequisites for this talk", "Python 3.6+");
        let answers = answers(values);

        assert_eq!(
            find_answer_by_pattern(&answers, "Expected audience expertise: Domain", true, &[]),
            Some("Intermediate")
        );
        assert_eq!(
            find_answer_by_pattern(&answers, "expected audience expertise: python", false, &[]),
            Some("Advanced")
        );
        assert_eq!(
            find_answer_by_pattern(&answers, "expected audience expertise: python", true, &[]),
            None
        );
        assert_eq!(
            find_answer_by_pattern(&answers, "", false, &["prerequisite"]),
            Some("Python 3.6+")
        );
        assert_eq!(
            find_answer_by_pattern(&answers, "", false, &["requirement", "Prerequisite"]),
            Some("Python 3.6+")
        );
        assert_eq!(find_answer_by_pattern(&answers, "Not Found", true, &[]), None);
        assert_eq!(find_answer_by_pattern(&[], "Any Pattern", false, &["any"]), None);
    }

    #[test]
    fn test_simple_talk_from_talk() {
        let talk = talk("ABC123", "Test Talk", &[("S1", "John Doe"), ("S2", "Jane Smith")], "Python", vec![]);

        let simple = SimpleTalk::from_talk(&talk);

        assert_eq!(simple.code, "ABC123");
        assert_eq!(simple.title, "Test Talk");
        assert_eq!(simple.speaker, "John Doe, Jane Smith");
        assert_eq!(simple.track, "Python");
        assert_eq!(simple.duration, "45");
        assert_eq!(simple.abstract_, "Abstract for ABC123");
        assert_eq!(simple.description, "Description for ABC123");
        assert_eq!(simple.organisation, "");
        assert_eq!(simple.prerequisites, "");
    }

    #[test]
    fn test_extract_expertise_and_prerequisites() {
        let talk = talk("ABC123", "Test Talk", &[("S1", "John Doe")], "Python", level_answers());
        let mut simple = SimpleTalk::from_talk(&talk);

        extract_expertise_and_prerequisites(&talk, &mut simple);

        assert_eq!(simple.domain_level, "Intermediate");
        assert_eq!(simple.python_level, "Advanced");
        assert_eq!(simple.prerequisites, "Python 3.6+");
    }

    #[test]
    fn test_extract_organisation_deduplicates_and_caches() {
        let talk = talk("ABC123", "Test Talk", &[("S1", "John Doe"), ("S2", "Jane Smith")], "Python", vec![]);
        let directory = Directory::default()
            .with(speaker("S1", "John Doe", "Acme Inc."))
            .with(speaker("S2", "Jane Smith", "Acme Inc."));
        let mut simple = SimpleTalk::from_talk(&talk);
        let mut speakers = HashMap::new();

        extract_organisation(&talk, &mut simple, &directory, "demo", &mut speakers);
        extract_organisation(&talk, &mut simple, &directory, "demo", &mut speakers);

        assert_eq!(simple.organisation, "Acme Inc.");
        assert_eq!(speakers.len(), 2);
        assert_eq!(speakers["S1"].name, "John Doe");
        assert_eq!(directory.lookups.get(), 2);
    }

    #[test]
    fn test_extract_organisation_skips_unknown_speakers() {
        let talk = talk("ABC123", "Test Talk", &[("S1", "John Doe"), ("S9", "Nobody")], "Python", vec![]);
        let directory = Directory::default().with(speaker("S1", "John Doe", "Acme Inc."));
        let mut simple = SimpleTalk::from_talk(&talk);

        extract_organisation(&talk, &mut simple, &directory, "demo", &mut HashMap::new());

        assert_eq!(simple.organisation, "Acme Inc.");
    }

    #[test]
    fn test_talks_to_json() {
        let first = talk(
            "ABC123",
            "Python Best Practices",
            &[("S1", "John Doe"), ("S2", "Jane Smith")],
            "Python",
            level_answers(),
        );
        let second = talk("DEF456", "Introduction to Django", &[("S3", "Bob Johnson")], "Web", vec![]);
        let directory = Directory::default()
            .with(speaker("S1", "John Doe", "Acme Inc."))
            .with(speaker("S2", "Jane Smith", "Acme Inc."))
            .with(speaker("S3", "Bob Johnson", "Django Corp"));

        let json = talks_to_json(&[first, second], &directory, "demo").expect("serializes");
        let talks: Vec<SimpleTalk> = serde_json::from_str(&json).expect("round trips");

        assert_eq!(talks.len(), 2);
        assert_eq!(talks[0].code, "ABC123");
        assert_eq!(talks[0].speaker, "John Doe, Jane Smith");
        assert_eq!(talks[0].organisation, "Acme Inc.");
        assert_eq!(talks[0].domain_level, "Intermediate");
        assert_eq!(talks[0].python_level, "Advanced");
        assert_eq!(talks[0].prerequisites, "Python 3.6+");
        assert_eq!(talks[1].organisation, "Django Corp");
        assert_eq!(talks[1].track, "Web");
        assert_eq!(talks[1].domain_level, "");
        assert_eq!(talks[1].prerequisites, "");

        let raw: Value = serde_json::from_str(&json).expect("json");
        assert_eq!(raw[0]["abstract"], "Abstract for ABC123");
        assert_eq!(raw[0]["duration"], "45");
        assert_eq!(directory.lookups.get(), 3);
    }
}
