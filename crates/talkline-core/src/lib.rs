//! Client for pretalx-style conference management APIs.
//!
//! [`PretalxClient`] fetches events, submissions, talks, speakers and the
//! other resources of an event, follows paginated listings eagerly or lazily,
//! throttles outgoing requests and brings records of newer API versions back
//! into the nested shape the typed [`models`] describe.
//!
//! ```no_run
//! use talkline_core::{PretalxClient, QueryParams};
//!
//! let mut config = talkline_core::load_config().config;
//! config.apply_env()?;
//! let client = PretalxClient::new(&config)?;
//! for talk in client.talks("pyconde-pydata-2025", &QueryParams::new())? {
//!     let talk = talk?;
//!     println!("{} by {:?}", talk.submission.title, talk.submission.speaker_names());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod expand;
pub mod logging;
pub mod models;
pub mod pagination;
pub mod raw;
pub mod storage;
pub mod talks;
pub mod throttle;
pub mod transport;

pub use cache::{CacheStats, SessionCache};
pub use client::{Listing, PretalxClient};
pub use config::{
    ClientConfig, ConfigLoadResult, ConfigSource, StorageSettings, ThrottleSettings, load_config,
    load_config_from,
};
pub use error::{ApiError, ConfigError, ExportError, Result, StorageError, ValidationError};
pub use logging::{LoggingDestination, LoggingError, init_logging};
pub use pagination::Resolution;
pub use raw::RawRecord;
pub use storage::{LocalFileClient, SpreadsheetClient, Storage, StorageClient, storage_client};
pub use talks::{SimpleTalk, SpeakerLookup, save_talks_to_json, talks_as_json, talks_to_json};
pub use throttle::RateLimiter;
pub use transport::{HttpResponse, HttpTransport, Outcome, QueryParams, Transport};
