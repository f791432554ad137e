//! Backward-compatible expansion of id-only references.
//!
//! Newer API versions reference speakers, submission types, tracks and answers
//! by id. Downstream code expects the older nested shape, so raw records are
//! rewritten here before validation, looking sub-resources up through the
//! [`SessionCache`] so that each one is fetched at most once per session.
//!
//! Expansion is idempotent: fields that already hold objects are left alone.

use std::cell::RefCell;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::cache::SessionCache;
use crate::error::Result;
use crate::pagination::{self, Resolution};
use crate::raw::RawRecord;
use crate::transport::{Outcome, QueryParams, Requester};

/// Submission fields of the newer wire format with no counterpart in the nested shape.
pub const SUBMISSION_WIRE_ONLY: &[&str] = &[
    "reviews",
    "assigned_reviewers",
    "median_score",
    "mean_score",
    "is_anonymised",
    "anonymised_data",
    "invitation_token",
    "access_code",
    "review_code",
];

/// Speaker fields of the newer wire format with no counterpart in the nested shape.
pub const SPEAKER_WIRE_ONLY: &[&str] = &["email", "timezone", "locale", "has_arrived", "avatar_url"];

pub(crate) fn event_endpoint(event_slug: &str, resource: &str) -> String {
    format!("/api/events/{}/{resource}/", urlencoding::encode(event_slug))
}

pub(crate) fn item_endpoint(event_slug: &str, resource: &str, id: &str) -> String {
    format!(
        "/api/events/{}/{resource}/{}/",
        urlencoding::encode(event_slug),
        urlencoding::encode(id)
    )
}

/// Rewrites raw records of one event, consulting and filling the session cache.
pub struct Expander<'a> {
    requester: &'a Requester,
    cache: &'a RefCell<SessionCache>,
    event_slug: String,
    prepopulate: bool,
}

impl<'a> Expander<'a> {
    pub fn new(
        requester: &'a Requester,
        cache: &'a RefCell<SessionCache>,
        event_slug: &str,
        prepopulate: bool,
    ) -> Self {
        Self {
            requester,
            cache,
            event_slug: event_slug.to_string(),
            prepopulate,
        }
    }

    /// Bring a submission (or talk) record into the nested shape.
    pub fn expand_submission(&self, record: &mut RawRecord) -> Result<()> {
        if self.prepopulate && !self.cache.borrow().is_populated(&self.event_slug) {
            let with_answers = record.id_list("answers").is_some();
            self.populate(with_answers);
        }

        if let Some(codes) = record.code_list("speakers") {
            let mut speakers = Vec::with_capacity(codes.len());
            for code in codes {
                let speaker = self.speaker(&code)?;
                speakers.push(json!({
                    "code": speaker.get("code").cloned().unwrap_or(Value::String(code)),
                    "name": speaker.get("name").cloned().unwrap_or(Value::Null),
                }));
            }
            record.insert("speakers", speakers);
        }

        if let Some(type_id) = record.id_field("submission_type") {
            let submission_type = self.submission_type(type_id)?;
            record.insert("submission_type", name_of(&submission_type));
            record.insert("submission_type_id", type_id);
        }

        if let Some(track_id) = record.id_field("track") {
            let track = self.track(track_id)?;
            record.insert("track", name_of(&track));
        }

        self.expand_answer_list(record)?;

        if !record.contains("is_featured") {
            record.insert("is_featured", false);
        }

        // Resources cannot be resolved from any endpoint available to us.
        if record.id_list("resources").is_some() {
            record.insert("resources", Value::Array(Vec::new()));
        }

        record.strip(SUBMISSION_WIRE_ONLY);
        Ok(())
    }

    /// Bring a speaker record into the nested shape.
    pub fn expand_speaker(&self, record: &mut RawRecord) -> Result<()> {
        self.expand_answer_list(record)?;
        record.strip(SPEAKER_WIRE_ONLY);
        Ok(())
    }

    /// Resolve a bare question id on an answer record fetched on its own.
    ///
    /// Unlike answers nested in submissions, an unreadable question keeps the
    /// answer and only loses the question text.
    pub fn expand_answer(&self, record: &mut RawRecord) -> Result<()> {
        if let Some(question_id) = record.id_field("question") {
            let question = self
                .question_ref(question_id)?
                .unwrap_or_else(|| json!({ "id": question_id }));
            record.insert("question", question);
        }
        Ok(())
    }

    fn expand_answer_list(&self, record: &mut RawRecord) -> Result<()> {
        let Some(ids) = record.id_list("answers") else {
            return Ok(());
        };

        let mut answers = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(answer) = self.answer(id)? {
                answers.push(answer);
            }
        }

        if answers.is_empty() {
            record.remove("answers");
        } else {
            record.insert("answers", answers);
        }
        Ok(())
    }

    fn speaker(&self, code: &str) -> Result<Value> {
        if let Some(cached) = self.cache.borrow().speaker(code) {
            debug!(speaker = code, "cache hit");
            return Ok(cached.clone());
        }
        let endpoint = item_endpoint(&self.event_slug, "speakers", code);
        let speaker = self.requester.get_json(&endpoint, &QueryParams::new())?;
        self.cache
            .borrow_mut()
            .insert_speaker(code.to_string(), speaker.clone());
        Ok(speaker)
    }

    fn submission_type(&self, id: i64) -> Result<Value> {
        if let Some(cached) = self.cache.borrow().submission_type(id) {
            debug!(type_id = id, "cache hit");
            return Ok(cached.clone());
        }
        let endpoint = item_endpoint(&self.event_slug, "submission-types", &id.to_string());
        let record = match self.requester.get_json(&endpoint, &QueryParams::new()) {
            Ok(record) => record,
            Err(err) if err.status().is_some() => {
                warn!(type_id = id, error = %err, "cannot fetch submission type");
                json!({ "name": { "en": format!("Type {id}") } })
            }
            Err(err) => return Err(err),
        };
        self.cache
            .borrow_mut()
            .insert_submission_type(id, record.clone());
        Ok(record)
    }

    fn track(&self, id: i64) -> Result<Value> {
        if let Some(cached) = self.cache.borrow().track(id) {
            debug!(track_id = id, "cache hit");
            return Ok(cached.clone());
        }
        let endpoint = item_endpoint(&self.event_slug, "tracks", &id.to_string());
        let record = match self.requester.get_json(&endpoint, &QueryParams::new()) {
            Ok(record) => record,
            Err(err) if err.status().is_some() => {
                warn!(track_id = id, error = %err, "cannot fetch track");
                json!({ "name": { "en": format!("Track {id}") } })
            }
            Err(err) => return Err(err),
        };
        self.cache.borrow_mut().insert_track(id, record.clone());
        Ok(record)
    }

    /// `None` when the answer, or the question it refers to, may not be read.
    fn answer(&self, id: i64) -> Result<Option<Value>> {
        if let Some(cached) = self.cache.borrow().answer(id) {
            return Ok(cached.cloned());
        }

        let endpoint = item_endpoint(&self.event_slug, "answers", &id.to_string());
        let answer = match self.requester.get_outcome(&endpoint, &QueryParams::new())? {
            Outcome::Success(answer) => self.attach_question(answer)?,
            Outcome::Unauthorized { .. } => None,
            failed => return failed.into_result().map(|_| None),
        };

        if answer.is_none() {
            debug!(answer_id = id, "cannot access answer - unauthorized");
        }
        self.cache.borrow_mut().insert_answer(id, answer.clone());
        Ok(answer)
    }

    fn attach_question(&self, mut answer: Value) -> Result<Option<Value>> {
        let Some(question_id) = answer.get("question").and_then(Value::as_i64) else {
            return Ok(Some(answer));
        };
        let Some(question) = self.question_ref(question_id)? else {
            return Ok(None);
        };
        answer["question"] = question;
        Ok(Some(answer))
    }

    /// `{id, question}` for a question id, or `None` if it may not be read.
    fn question_ref(&self, id: i64) -> Result<Option<Value>> {
        let cached = self.cache.borrow().question(id).cloned();
        let question = match cached {
            Some(question) => question,
            None => {
                let endpoint = item_endpoint(&self.event_slug, "questions", &id.to_string());
                match self.requester.get_outcome(&endpoint, &QueryParams::new())? {
                    Outcome::Success(question) => {
                        self.cache
                            .borrow_mut()
                            .insert_question(id, question.clone());
                        question
                    }
                    Outcome::Unauthorized { .. } => return Ok(None),
                    failed => return failed.into_result().map(|_| None),
                }
            }
        };
        let text = question.get("question").cloned().unwrap_or_else(|| json!({}));
        Ok(Some(json!({ "id": id, "question": text })))
    }

    /// Bulk-fetch speakers, submission types and tracks (and optionally
    /// questions and answers) of the event into the cache.
    ///
    /// A failing collection is logged and left to per-item lookups.
    fn populate(&self, with_answers: bool) {
        info!(event = %self.event_slug, "pre-populating caches");

        let speakers = self.populate_collection("speakers", |cache, record| {
            let code = record.get("code")?.as_str()?.to_string();
            cache.insert_speaker(code, record);
            Some(())
        });
        if let Some(count) = speakers {
            info!(count, "cached speakers");
        }

        let types = self.populate_collection("submission-types", |cache, record| {
            let id = record.get("id")?.as_i64()?;
            cache.insert_submission_type(id, record);
            Some(())
        });
        if let Some(count) = types {
            info!(count, "cached submission types");
        }

        let tracks = self.populate_collection("tracks", |cache, record| {
            let id = record.get("id")?.as_i64()?;
            cache.insert_track(id, record);
            Some(())
        });
        if let Some(count) = tracks {
            info!(count, "cached tracks");
        }

        if with_answers {
            self.populate_answers();
        }

        self.cache.borrow_mut().mark_populated(&self.event_slug);
    }

    fn populate_answers(&self) {
        let questions = self.populate_collection("questions", |cache, record| {
            let id = record.get("id")?.as_i64()?;
            cache.insert_question(id, record);
            Some(())
        });
        if let Some(count) = questions {
            info!(count, "cached questions");
        }

        let answers = match self.fetch_all("answers") {
            Ok(answers) => answers,
            Err(err) if err.is_unauthorized() => {
                debug!("cannot populate answer cache - unauthorized");
                return;
            }
            Err(err) => {
                warn!(error = %err, "failed to populate answer cache");
                return;
            }
        };

        let mut cached = 0usize;
        for answer in answers {
            let Some(id) = answer.get("id").and_then(Value::as_i64) else {
                continue;
            };
            match self.attach_question(answer) {
                Ok(Some(answer)) => {
                    self.cache.borrow_mut().insert_answer(id, Some(answer));
                    cached += 1;
                }
                Ok(None) => self.cache.borrow_mut().insert_answer(id, None),
                Err(err) => warn!(answer_id = id, error = %err, "skipping answer"),
            }
        }
        info!(count = cached, "cached answers");
    }

    fn populate_collection<F>(&self, resource: &str, mut store: F) -> Option<usize>
    where
        F: FnMut(&mut SessionCache, Value) -> Option<()>,
    {
        debug!(resource, "fetching all");
        match self.fetch_all(resource) {
            Ok(records) => {
                let mut cache = self.cache.borrow_mut();
                Some(
                    records
                        .into_iter()
                        .filter_map(|record| store(&mut cache, record))
                        .count(),
                )
            }
            Err(err) => {
                warn!(resource, error = %err, "failed to populate cache");
                None
            }
        }
    }

    fn fetch_all(&self, resource: &str) -> Result<Vec<Value>> {
        let endpoint = event_endpoint(&self.event_slug, resource);
        let first = self.requester.get_json(&endpoint, &QueryParams::new())?;
        let (_, records) = pagination::resolve(self.requester, &endpoint, first, Resolution::Eager)?;
        records.collect()
    }
}

fn name_of(record: &Value) -> Value {
    record.get("name").cloned().unwrap_or_else(|| json!({}))
}
