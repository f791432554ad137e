#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use reqwest::StatusCode;
use serde_json::{Value, json};
use talkline_core::error::Result;
use talkline_core::{ClientConfig, HttpResponse, PretalxClient, QueryParams, ThrottleSettings, Transport};

pub const EVENT: &str = "demo";
pub const ORIGIN: &str = "https://pretalx.test";

/// Requests seen by a [`MockTransport`], shared with the test after the
/// transport has been handed to a client.
#[derive(Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<String>>>);

impl CallLog {
    pub fn all(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Number of requests for exactly this endpoint (with query, if any).
    pub fn count(&self, key: &str) -> usize {
        self.0.borrow().iter().filter(|call| *call == key).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.0
            .borrow()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

/// Scripted transport keyed by `endpoint` or `endpoint?query`.
/// Anything unscripted answers 404.
#[derive(Default)]
pub struct MockTransport {
    responses: HashMap<String, (StatusCode, String)>,
    calls: CallLog,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, key: &str, body: Value) -> Self {
        self.responses
            .insert(key.to_string(), (StatusCode::OK, body.to_string()));
        self
    }

    pub fn fail(mut self, key: &str, status: StatusCode) -> Self {
        let body = json!({ "detail": status.canonical_reason() }).to_string();
        self.responses.insert(key.to_string(), (status, body));
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

impl Transport for MockTransport {
    fn get(&self, endpoint: &str, params: &QueryParams) -> Result<HttpResponse> {
        let key = if params.is_empty() {
            endpoint.to_string()
        } else {
            format!("{endpoint}?{}", params.to_query_string())
        };
        self.calls.0.borrow_mut().push(key.clone());
        let url = format!("{ORIGIN}{key}");
        Ok(match self.responses.get(&key) {
            Some((status, body)) => HttpResponse::new(*status, url, body.clone()),
            None => HttpResponse::new(StatusCode::NOT_FOUND, url, r#"{"detail":"Not found."}"#),
        })
    }
}

/// Configuration without meaningful throttling.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        throttle: ThrottleSettings {
            calls: 1_000,
            seconds: 1,
        },
        prepopulate_caches: false,
        ..ClientConfig::default()
    }
}

pub fn client_with(config: &ClientConfig, transport: MockTransport) -> (PretalxClient, CallLog) {
    let calls = transport.calls();
    (PretalxClient::with_transport(config, Box::new(transport)), calls)
}

pub fn client(transport: MockTransport) -> (PretalxClient, CallLog) {
    client_with(&fast_config(), transport)
}

pub fn endpoint(resource: &str) -> String {
    format!("/api/events/{EVENT}/{resource}/")
}

pub fn item(resource: &str, id: impl std::fmt::Display) -> String {
    format!("/api/events/{EVENT}/{resource}/{id}/")
}

/// An enveloped page.
pub fn page(count: usize, next: Option<&str>, results: Vec<Value>) -> Value {
    json!({
        "count": count,
        "next": next.map(|path| format!("{ORIGIN}{path}")),
        "previous": null,
        "results": results,
    })
}

/// A submission in the id-only wire format of newer API versions.
pub fn raw_submission(code: &str, speakers: &[&str]) -> Value {
    json!({
        "code": code,
        "title": format!("Submission {code}"),
        "state": "submitted",
        "speakers": speakers,
        "submission_type": 42,
        "track": 7,
        "reviews": [1, 2],
        "mean_score": 3.5,
    })
}

pub fn speaker(code: &str, name: &str) -> Value {
    json!({ "code": code, "name": name, "email": format!("{code}@example.org") })
}
