//! Resolution of list responses into a continuous sequence of records.
//!
//! The API answers list requests either with a bare JSON array or with an
//! envelope `{count, next, results}` where `next` links the following page.
//! [`resolve`] turns both shapes into a single record stream, either fetching
//! every page up front ([`Resolution::Eager`]) or one page at a time as the
//! caller iterates ([`Resolution::Lazy`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ApiError, Result};
use crate::transport::{QueryParams, Requester};

/// A stream of raw records. Page fetch failures surface as `Err` items.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<Value>> + 'a>;

/// Whether further pages are fetched up front or on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    Eager,
    #[default]
    Lazy,
}

/// One page of an enveloped list response.
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    pub count: usize,
    #[serde(default)]
    pub next: Option<String>,
    pub results: Vec<Value>,
}

/// The two shapes a list endpoint may answer with.
#[derive(Debug, Clone)]
pub enum ListPayload {
    Bare(Vec<Value>),
    Paged(Page),
}

impl ListPayload {
    pub fn parse(endpoint: &str, value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => Ok(ListPayload::Bare(items)),
            Value::Object(_) => {
                let page = serde_json::from_value::<Page>(value).map_err(|err| {
                    ApiError::UnexpectedShape {
                        endpoint: endpoint.to_string(),
                        reason: err.to_string(),
                    }
                })?;
                Ok(ListPayload::Paged(page))
            }
            other => Err(ApiError::UnexpectedShape {
                endpoint: endpoint.to_string(),
                reason: format!("expected a list or a page, got {}", kind_of(&other)),
            }),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Resolve the first response of a list endpoint into `(advertised count, records)`.
///
/// The count is what the upstream claims; it may exceed the number of records
/// actually produced when the upstream truncates.
pub fn resolve<'a>(
    requester: &'a Requester,
    endpoint: &str,
    first: Value,
    resolution: Resolution,
) -> Result<(usize, RecordStream<'a>)> {
    match ListPayload::parse(endpoint, first)? {
        ListPayload::Bare(items) => Ok((items.len(), Box::new(items.into_iter().map(Ok)))),
        ListPayload::Paged(page) => {
            debug!(
                endpoint = %endpoint,
                count = page.count,
                next = page.next.as_deref().unwrap_or("-"),
                "first page"
            );
            let count = page.count;
            let pages = Pages::new(requester, page);
            match resolution {
                Resolution::Lazy => {
                    debug!("non-blocking resolution of pagination");
                    Ok((count, Box::new(pages)))
                }
                Resolution::Eager => {
                    debug!("blocking resolution of pagination");
                    let records = pages.collect_all(count)?;
                    Ok((count, Box::new(records.into_iter().map(Ok))))
                }
            }
        }
    }
}

/// Pull-based page walker. The next page is fetched only once the current one
/// has been drained.
pub struct Pages<'a> {
    requester: &'a Requester,
    current: std::vec::IntoIter<Value>,
    next: Option<String>,
}

impl<'a> Pages<'a> {
    pub fn new(requester: &'a Requester, first: Page) -> Self {
        Self {
            requester,
            current: first.results.into_iter(),
            next: first.next,
        }
    }

    fn fetch_next(&mut self, link: &str) -> Result<()> {
        let (endpoint, params) = QueryParams::split_url(link)?;
        let value = self.requester.get_json(&endpoint, &params)?;
        let page = match ListPayload::parse(&endpoint, value)? {
            ListPayload::Paged(page) => page,
            ListPayload::Bare(items) => Page {
                count: items.len(),
                next: None,
                results: items,
            },
        };
        debug!(endpoint = %endpoint, results = page.results.len(), "next page");
        self.next = page.next;
        self.current = page.results.into_iter();
        Ok(())
    }

    fn collect_all(mut self, count: usize) -> Result<Vec<Value>> {
        let mut records = Vec::with_capacity(count);
        records.extend(self.current.by_ref());
        while let Some(link) = self.next.take() {
            self.fetch_next(&link)?;
            records.extend(self.current.by_ref());
            info!(fetched = records.len(), total = count, "fetched page");
        }
        Ok(records)
    }
}

impl Iterator for Pages<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.current.next() {
                return Some(Ok(record));
            }
            let link = self.next.take()?;
            if let Err(err) = self.fetch_next(&link) {
                return Some(Err(err));
            }
        }
    }
}
