//! Typed entities of the conference API, in the nested shape downstream code expects.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::error::{ApiError, ValidationError};
use crate::raw::RawRecord;

/// A string translated into several locales, keyed by locale code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiLingualStr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub de: Option<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, String>,
}

impl MultiLingualStr {
    pub fn en<T: Into<String>>(text: T) -> Self {
        Self {
            en: Some(text.into()),
            ..Self::default()
        }
    }

    /// English if present, then German, then whichever locale sorts first.
    pub fn best(&self) -> Option<&str> {
        self.en
            .as_deref()
            .or(self.de.as_deref())
            .or_else(|| self.other.values().next().map(String::as_str))
    }

    pub fn get(&self, locale: &str) -> Option<&str> {
        match locale {
            "en" => self.en.as_deref(),
            "de" => self.de.as_deref(),
            other => self.other.get(other).map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Me {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventUrls {
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub feed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub slug: String,
    pub name: MultiLingualStr,
    #[serde(default)]
    pub is_public: bool,
    pub date_from: NaiveDate,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub urls: Option<EventUrls>,
}

impl Event {
    /// The event's timezone, when it names a known IANA zone.
    pub fn tz(&self) -> Option<Tz> {
        self.timezone.as_deref()?.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Submitted,
    Accepted,
    Confirmed,
    Rejected,
    Canceled,
    Withdrawn,
    Deleted,
    Draft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSpeaker {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub biography: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub resource: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Reference from an answer or question to a selectable option.
///
/// Older payloads embed the option, newer ones only carry its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionRef {
    Id(i64),
    Embedded(AnswerOption),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: i64,
    pub answer: MultiLingualStr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerQuestionRef {
    pub id: i64,
    #[serde(default)]
    pub question: MultiLingualStr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub id: i64,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub answer_file: Option<String>,
    pub question: AnswerQuestionRef,
    #[serde(default)]
    pub submission: Option<String>,
    #[serde(default)]
    pub review: Option<i64>,
    #[serde(default)]
    pub person: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub speakers: Vec<SubmissionSpeaker>,
    #[serde(default)]
    pub created: Option<DateTime<FixedOffset>>,
    pub submission_type: MultiLingualStr,
    #[serde(default)]
    pub submission_type_id: Option<i64>,
    #[serde(default)]
    pub track: Option<MultiLingualStr>,
    #[serde(default)]
    pub track_id: Option<i64>,
    pub state: State,
    #[serde(default)]
    pub pending_state: Option<State>,
    #[serde(default, rename = "abstract")]
    pub abstract_: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub slot_count: Option<u32>,
    #[serde(default)]
    pub do_not_record: bool,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub content_locale: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub answers: Option<Vec<Answer>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub internal_notes: Option<String>,
}

impl Submission {
    pub fn speaker_names(&self) -> Vec<&str> {
        self.speakers.iter().map(|s| s.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(default)]
    pub start: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub end: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub room: Option<MultiLingualStr>,
    #[serde(default)]
    pub room_id: Option<i64>,
}

/// A submission that may already be scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Talk {
    #[serde(flatten)]
    pub submission: Submission,
    #[serde(default)]
    pub slot: Option<Slot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speaker {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub biography: Option<String>,
    #[serde(default)]
    pub submissions: Vec<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub answers: Option<Vec<Answer>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub question: MultiLingualStr,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub help_text: Option<MultiLingualStr>,
    #[serde(default)]
    pub options: Option<Vec<OptionRef>>,
    #[serde(default)]
    pub contains_personal_information: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomAvailability {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: i64,
    pub name: MultiLingualStr,
    #[serde(default)]
    pub description: Option<MultiLingualStr>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub availabilities: Option<Vec<RoomAvailability>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default)]
    pub id: Option<i64>,
    pub tag: String,
    #[serde(default)]
    pub description: Option<MultiLingualStr>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub name: MultiLingualStr,
    #[serde(default)]
    pub description: Option<MultiLingualStr>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub requires_access_code: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionType {
    pub id: i64,
    pub name: MultiLingualStr,
    #[serde(default)]
    pub default_duration: Option<u32>,
    #[serde(default)]
    pub deadline: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub requires_access_code: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub submission: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub created: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub updated: Option<DateTime<FixedOffset>>,
}

/// Entity types with a name for log lines and validation errors.
pub trait Entity: DeserializeOwned {
    const NAME: &'static str;
}

macro_rules! entity {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(impl Entity for $ty {
            const NAME: &'static str = $name;
        })*
    };
}

entity! {
    Me => "me",
    Event => "event",
    Submission => "submission",
    Talk => "talk",
    Speaker => "speaker",
    Answer => "answer",
    Question => "question",
    Room => "room",
    Tag => "tag",
    Track => "track",
    SubmissionType => "submission type",
    Review => "review",
}

/// Validate a single record. Failure is an error for the caller.
pub fn validate_one<T: Entity>(value: Value) -> Result<T, ApiError> {
    validate_prepared(value, |_| Ok(()))
}

/// Like [`validate_one`], rewriting the raw record with `prepare` first.
pub fn validate_prepared<T, F>(value: Value, prepare: F) -> Result<T, ApiError>
where
    T: Entity,
    F: FnOnce(&mut RawRecord) -> Result<(), ApiError>,
{
    let mut record = RawRecord::from_value(T::NAME, value)?;
    prepare(&mut record)?;
    Ok(record.validate(T::NAME)?)
}

/// Validate a record inside a batch: failures are logged and yield `None`.
pub fn validate_in_batch<T: Entity>(record: RawRecord) -> Option<T> {
    match record.validate::<T>(T::NAME) {
        Ok(entity) => Some(entity),
        Err(err) => {
            log_dropped(&err);
            None
        }
    }
}

pub(crate) fn log_dropped(err: &ValidationError) {
    error!(
        entity = err.entity,
        key = err.key.as_deref().unwrap_or("-"),
        reason = %err.reason,
        "dropping record that failed validation"
    );
}
