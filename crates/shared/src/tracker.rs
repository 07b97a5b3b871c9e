use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::store::KeyValueStore;

const WATERMARK_KEY: &str = "crawl_watermark";
const PROCESSED_PREFIX: &str = "processed_";
const MAX_KEY_LEN: usize = 200;
const HASH_SUFFIX_LEN: usize = 16;

/// Replace anything but ASCII alphanumerics with `_` and cap the length.
/// Keys that would be cut end in a digest of the full input instead, so
/// long inputs sharing a prefix stay distinct.
pub fn sanitize_key(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.len() <= MAX_KEY_LEN {
        return cleaned;
    }

    let digest = format!("{:x}", Sha256::digest(raw.as_bytes()));
    let keep = MAX_KEY_LEN - HASH_SUFFIX_LEN - 1;
    format!("{}_{}", &cleaned[..keep], &digest[..HASH_SUFFIX_LEN])
}

/// `candidate > current`.
pub fn should_advance(candidate: DateTime<Utc>, current: DateTime<Utc>) -> bool {
    candidate > current
}

/// Stored under the per-URL key once a post has been published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedMarker {
    pub url: String,
    pub processed_at: DateTime<Utc>,
    pub path: Option<String>,
}

/// Watermark and per-URL dedup bookkeeping over a key-value store.
pub struct CrawlTracker<S> {
    store: S,
    fallback_window: Duration,
}

impl<S: KeyValueStore> CrawlTracker<S> {
    pub fn new(store: S, fallback_window: Duration) -> Self {
        Self {
            store,
            fallback_window,
        }
    }

    pub fn cold_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.fallback_window
    }

    /// The stored watermark, or `now - fallback_window` on cold start.
    /// Read failures degrade to a cold start.
    pub async fn load_watermark(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let cold_start = self.cold_start(now);

        let raw = match self.store.get(WATERMARK_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No stored watermark, starting from {}", cold_start);
                return cold_start;
            }
            Err(e) => {
                warn!("Could not read watermark, using cold start: {}", e);
                return cold_start;
            }
        };

        match serde_json::from_str::<DateTime<Utc>>(&raw) {
            Ok(watermark) => watermark,
            Err(e) => {
                warn!("Stored watermark {:?} is not a timestamp, using cold start: {}", raw, e);
                cold_start
            }
        }
    }

    pub async fn record_watermark(&self, watermark: DateTime<Utc>) -> Result<(), PersistenceError> {
        let value = serde_json::to_string(&watermark).map_err(|e| PersistenceError::new(WATERMARK_KEY, e))?;
        self.store.put(WATERMARK_KEY, value).await
    }

    /// Read failures are logged and treated as "not seen".
    pub async fn is_processed(&self, url: &str) -> bool {
        let key = processed_key(url);
        match self.store.get(&key).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!("Dedup check failed for {}, treating as new: {}", url, e);
                false
            }
        }
    }

    pub async fn mark_processed(&self, marker: &ProcessedMarker) -> Result<(), PersistenceError> {
        let key = processed_key(&marker.url);
        let value = serde_json::to_string(marker).map_err(|e| PersistenceError::new(&key, e))?;
        self.store.put(&key, value).await
    }
}

fn processed_key(url: &str) -> String {
    sanitize_key(&format!("{}{}", PROCESSED_PREFIX, url))
}

/// Tracks the newest `last_modified` among entries attempted in one pass,
/// held strictly below the oldest entry left for a later pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassWatermark {
    newest: Option<DateTime<Utc>>,
    oldest_deferred: Option<DateTime<Utc>>,
}

impl PassWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries with unknown recency do not move the watermark.
    pub fn observe(&mut self, last_modified: Option<DateTime<Utc>>) {
        if let Some(ts) = last_modified {
            self.newest = Some(self.newest.map_or(ts, |current| current.max(ts)));
        }
    }

    /// An entry that was not attempted this pass must still pass the next
    /// pass's cutoff.
    pub fn defer(&mut self, last_modified: Option<DateTime<Utc>>) {
        if let Some(ts) = last_modified {
            self.oldest_deferred = Some(self.oldest_deferred.map_or(ts, |current| current.min(ts)));
        }
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.newest
    }

    /// The value to record, if it moves past `loaded`.
    pub fn advance_from(&self, loaded: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let newest = self.newest?;
        let candidate = match self.oldest_deferred {
            Some(deferred) if deferred <= newest => deferred - Duration::nanoseconds(1),
            _ => newest,
        };
        Some(candidate).filter(|candidate| should_advance(*candidate, loaded))
    }
}
