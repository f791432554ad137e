//! Typed access to the conference API, one operation per resource.

use std::cell::{Cell, RefCell};

use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{CacheStats, SessionCache};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::expand::{Expander, event_endpoint, item_endpoint};
use crate::models::{
    Answer, Entity, Event, Me, Question, Review, Room, Speaker, Submission, SubmissionType, Tag,
    Talk, Track, log_dropped, validate_in_batch, validate_prepared,
};
use crate::pagination::{self, Resolution};
use crate::raw::RawRecord;
use crate::throttle::RateLimiter;
use crate::transport::{HttpTransport, Outcome, QueryParams, Requester, Transport};

/// Records of a list endpoint together with the count the upstream advertised.
///
/// The count is best effort: a truncating upstream can yield fewer records.
/// Lazily resolved listings fetch further pages while being iterated.
pub struct Listing<'a, T> {
    total: usize,
    items: Box<dyn Iterator<Item = Result<T>> + 'a>,
}

impl<'a, T: 'a> Listing<'a, T> {
    pub fn new<I>(total: usize, items: I) -> Self
    where
        I: Iterator<Item = Result<T>> + 'a,
    {
        Self {
            total,
            items: Box::new(items),
        }
    }

    /// Advertised number of records.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn into_parts(self) -> (usize, Box<dyn Iterator<Item = Result<T>> + 'a>) {
        (self.total, self.items)
    }

    /// Drain the listing, stopping at the first failed page fetch or expansion.
    pub fn into_vec(self) -> Result<Vec<T>> {
        self.items.collect()
    }

    fn materialize(self) -> Result<Self> {
        let total = self.total;
        let items = self.into_vec()?;
        Ok(Self::new(total, items.into_iter().map(Ok)))
    }
}

impl<T> Iterator for Listing<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}

/// Client for a pretalx-style conference management API.
///
/// Sub-resources referenced by id are expanded into the nested shape and
/// cached for the lifetime of the client. The client is meant to be driven
/// by one caller at a time and is therefore not `Sync`.
pub struct PretalxClient {
    requester: Requester,
    cache: RefCell<SessionCache>,
    resolution: Cell<Resolution>,
    prepopulate: Cell<bool>,
}

impl PretalxClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::with_transport(config, Box::new(transport)))
    }

    /// Build a client on top of any transport, e.g. a scripted one in tests.
    pub fn with_transport(config: &ClientConfig, transport: Box<dyn Transport>) -> Self {
        let limiter = RateLimiter::per_seconds(config.throttle.calls, config.throttle.seconds);
        Self {
            requester: Requester::new(transport, limiter),
            cache: RefCell::new(SessionCache::new()),
            resolution: Cell::new(config.resolution),
            prepopulate: Cell::new(config.prepopulate_caches),
        }
    }

    /// Allow at most `calls` requests per `seconds` from now on.
    pub fn set_throttling(&self, calls: u32, seconds: u64) {
        self.requester
            .set_limiter(RateLimiter::per_seconds(calls, seconds));
    }

    pub fn set_resolution(&self, resolution: Resolution) {
        self.resolution.set(resolution);
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution.get()
    }

    /// Whether the first submission of an event triggers bulk fetching of its
    /// speakers, submission types and tracks.
    pub fn set_cache_prepopulation(&self, enabled: bool) {
        self.prepopulate.set(enabled);
    }

    pub fn clear_caches(&self) {
        self.cache.borrow_mut().clear();
        info!("cleared all caches");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.borrow().stats()
    }

    /// The user the configured token belongs to.
    pub fn me(&self) -> Result<Me> {
        self.fetch_one("/api/me", &QueryParams::new(), no_expansion)
    }

    pub fn event(&self, event_slug: &str) -> Result<Event> {
        let endpoint = format!("/api/events/{}/", urlencoding::encode(event_slug));
        self.fetch_one(&endpoint, &QueryParams::new(), no_expansion)
    }

    pub fn events(&self, params: &QueryParams) -> Result<Listing<'_, Event>> {
        self.fetch_list("/api/events/", params, no_expansion)
    }

    pub fn submission(&self, event_slug: &str, code: &str, params: &QueryParams) -> Result<Submission> {
        let expander = self.expander(event_slug);
        let endpoint = item_endpoint(event_slug, "submissions", code);
        self.fetch_one(&endpoint, params, |record| expander.expand_submission(record))
    }

    pub fn submissions(&self, event_slug: &str, params: &QueryParams) -> Result<Listing<'_, Submission>> {
        let expander = self.expander(event_slug);
        let endpoint = event_endpoint(event_slug, "submissions");
        self.fetch_list(&endpoint, params, move |record| expander.expand_submission(record))
    }

    /// A scheduled talk. Servers without a talks endpoint answer from submissions.
    pub fn talk(&self, event_slug: &str, code: &str, params: &QueryParams) -> Result<Talk> {
        let endpoint = item_endpoint(event_slug, "talks", code);
        let value = match self.requester.get_outcome(&endpoint, params)? {
            Outcome::NotFound { url } => {
                debug!(url = %url, "no talk endpoint, falling back to submissions");
                let fallback = item_endpoint(event_slug, "submissions", code);
                self.requester.get_json(&fallback, params)?
            }
            outcome => outcome.into_result()?,
        };
        let expander = self.expander(event_slug);
        validate_prepared(value, |record| expander.expand_submission(record))
    }

    pub fn talks(&self, event_slug: &str, params: &QueryParams) -> Result<Listing<'_, Talk>> {
        let mut endpoint = event_endpoint(event_slug, "talks");
        let first = match self.requester.get_outcome(&endpoint, params)? {
            Outcome::NotFound { url } => {
                debug!(url = %url, "no talks endpoint, falling back to submissions");
                endpoint = event_endpoint(event_slug, "submissions");
                self.requester.get_json(&endpoint, params)?
            }
            outcome => outcome.into_result()?,
        };
        let expander = self.expander(event_slug);
        self.listing(&endpoint, first, move |record| expander.expand_submission(record))
    }

    pub fn speaker(&self, event_slug: &str, code: &str, params: &QueryParams) -> Result<Speaker> {
        let expander = self.expander(event_slug);
        let endpoint = item_endpoint(event_slug, "speakers", code);
        self.fetch_one(&endpoint, params, |record| expander.expand_speaker(record))
    }

    pub fn speakers(&self, event_slug: &str, params: &QueryParams) -> Result<Listing<'_, Speaker>> {
        let expander = self.expander(event_slug);
        let endpoint = event_endpoint(event_slug, "speakers");
        self.fetch_list(&endpoint, params, move |record| expander.expand_speaker(record))
    }

    pub fn review(&self, event_slug: &str, id: i64, params: &QueryParams) -> Result<Review> {
        let endpoint = item_endpoint(event_slug, "reviews", &id.to_string());
        self.fetch_one(&endpoint, params, no_expansion)
    }

    pub fn reviews(&self, event_slug: &str, params: &QueryParams) -> Result<Listing<'_, Review>> {
        self.fetch_list(&event_endpoint(event_slug, "reviews"), params, no_expansion)
    }

    pub fn room(&self, event_slug: &str, id: i64, params: &QueryParams) -> Result<Room> {
        let endpoint = item_endpoint(event_slug, "rooms", &id.to_string());
        self.fetch_one(&endpoint, params, no_expansion)
    }

    pub fn rooms(&self, event_slug: &str, params: &QueryParams) -> Result<Listing<'_, Room>> {
        self.fetch_list(&event_endpoint(event_slug, "rooms"), params, no_expansion)
    }

    pub fn question(&self, event_slug: &str, id: i64, params: &QueryParams) -> Result<Question> {
        let endpoint = item_endpoint(event_slug, "questions", &id.to_string());
        self.fetch_one(&endpoint, params, no_expansion)
    }

    pub fn questions(&self, event_slug: &str, params: &QueryParams) -> Result<Listing<'_, Question>> {
        self.fetch_list(&event_endpoint(event_slug, "questions"), params, no_expansion)
    }

    pub fn answer(&self, event_slug: &str, id: i64, params: &QueryParams) -> Result<Answer> {
        let expander = self.expander(event_slug);
        let endpoint = item_endpoint(event_slug, "answers", &id.to_string());
        self.fetch_one(&endpoint, params, |record| expander.expand_answer(record))
    }

    pub fn answers(&self, event_slug: &str, params: &QueryParams) -> Result<Listing<'_, Answer>> {
        let expander = self.expander(event_slug);
        let endpoint = event_endpoint(event_slug, "answers");
        self.fetch_list(&endpoint, params, move |record| expander.expand_answer(record))
    }

    pub fn tag(&self, event_slug: &str, tag: &str, params: &QueryParams) -> Result<Tag> {
        self.fetch_one(&item_endpoint(event_slug, "tags", tag), params, no_expansion)
    }

    pub fn tags(&self, event_slug: &str, params: &QueryParams) -> Result<Listing<'_, Tag>> {
        self.fetch_list(&event_endpoint(event_slug, "tags"), params, no_expansion)
    }

    pub fn track(&self, event_slug: &str, id: i64, params: &QueryParams) -> Result<Track> {
        let endpoint = item_endpoint(event_slug, "tracks", &id.to_string());
        self.fetch_one(&endpoint, params, no_expansion)
    }

    pub fn tracks(&self, event_slug: &str, params: &QueryParams) -> Result<Listing<'_, Track>> {
        self.fetch_list(&event_endpoint(event_slug, "tracks"), params, no_expansion)
    }

    pub fn submission_type(&self, event_slug: &str, id: i64, params: &QueryParams) -> Result<SubmissionType> {
        let endpoint = item_endpoint(event_slug, "submission-types", &id.to_string());
        self.fetch_one(&endpoint, params, no_expansion)
    }

    pub fn submission_types(
        &self,
        event_slug: &str,
        params: &QueryParams,
    ) -> Result<Listing<'_, SubmissionType>> {
        let endpoint = event_endpoint(event_slug, "submission-types");
        self.fetch_list(&endpoint, params, no_expansion)
    }

    fn expander(&self, event_slug: &str) -> Expander<'_> {
        Expander::new(
            &self.requester,
            &self.cache,
            event_slug,
            self.prepopulate.get(),
        )
    }

    fn fetch_one<T, F>(&self, endpoint: &str, params: &QueryParams, prepare: F) -> Result<T>
    where
        T: Entity,
        F: FnOnce(&mut RawRecord) -> Result<()>,
    {
        let value = self.requester.get_json(endpoint, params)?;
        validate_prepared(value, prepare)
    }

    fn fetch_list<'a, T, F>(
        &'a self,
        endpoint: &str,
        params: &QueryParams,
        prepare: F,
    ) -> Result<Listing<'a, T>>
    where
        T: Entity + 'a,
        F: FnMut(&mut RawRecord) -> Result<()> + 'a,
    {
        let first = self.requester.get_json(endpoint, params)?;
        self.listing(endpoint, first, prepare)
    }

    fn listing<'a, T, F>(&'a self, endpoint: &str, first: Value, mut prepare: F) -> Result<Listing<'a, T>>
    where
        T: Entity + 'a,
        F: FnMut(&mut RawRecord) -> Result<()> + 'a,
    {
        let resolution = self.resolution.get();
        let (total, records) = pagination::resolve(&self.requester, endpoint, first, resolution)?;

        let items = records.filter_map(move |item| {
            let value = match item {
                Ok(value) => value,
                Err(err) => return Some(Err(err)),
            };
            let mut record = match RawRecord::from_value(T::NAME, value) {
                Ok(record) => record,
                Err(err) => {
                    log_dropped(&err);
                    return None;
                }
            };
            if let Err(err) = prepare(&mut record) {
                return Some(Err(err));
            }
            validate_in_batch::<T>(record).map(Ok)
        });

        let listing = Listing::new(total, items);
        match resolution {
            Resolution::Lazy => Ok(listing),
            Resolution::Eager => listing.materialize(),
        }
    }
}

fn no_expansion(_: &mut RawRecord) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_reports_total_separately_from_items() {
        let listing: Listing<'_, u32> = Listing::new(10, vec![Ok(1), Ok(2)].into_iter());
        assert_eq!(listing.total(), 10);
        assert_eq!(listing.into_vec().expect("no errors"), vec![1, 2]);
    }

    #[test]
    fn test_materialize_stops_at_first_error() {
        let items = vec![
            Ok(1),
            Err(crate::error::ApiError::InvalidUrl("x".to_string())),
            Ok(3),
        ];
        let listing: Listing<'_, u32> = Listing::new(3, items.into_iter());
        assert!(listing.materialize().is_err());
    }
}
