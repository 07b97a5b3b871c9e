use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::events::Event;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

use crate::error::PipelineError;
use crate::models::ListingEntry;

/// Which shape of listing the entries came from. Decides how the recency
/// cutoff is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingSource {
    Sitemap,
    Page,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub source: ListingSource,
    pub entries: Vec<ListingEntry>,
}

impl Listing {
    /// Sitemaps are unordered and filtered in full; listing pages are
    /// newest-first and cut at the first stale card.
    pub fn recent(self, cutoff: DateTime<Utc>) -> Vec<ListingEntry> {
        match self.source {
            ListingSource::Sitemap => filter_recent(self.entries, cutoff),
            ListingSource::Page => take_recent(self.entries, cutoff),
        }
    }
}

/// CSS selectors for an HTML index page of article cards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingSelectors {
    pub card: String,
    pub link: String,
    pub time: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            card: "article".to_string(),
            link: "a.post-card-image-link".to_string(),
            time: "time[datetime]".to_string(),
        }
    }
}

/// Parse either an XML sitemap or an HTML listing page.
pub fn parse_listing(
    body: &str,
    base_url: &Url,
    selectors: &ListingSelectors,
) -> Result<Listing, PipelineError> {
    let head = body.trim_start();
    if head.starts_with("<?xml") || head.contains("<urlset") {
        Ok(Listing {
            source: ListingSource::Sitemap,
            entries: parse_sitemap(body)?,
        })
    } else {
        Ok(Listing {
            source: ListingSource::Page,
            entries: parse_listing_page(body, base_url, selectors)?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum UrlField {
    None,
    Loc,
    LastMod,
}

/// One entry per `<url>` with both `<loc>` and a readable `<lastmod>`.
/// Only direct children of `<url>` count, so image and news extensions
/// nested inside an entry are ignored.
pub fn parse_sitemap(xml: &str) -> Result<Vec<ListingEntry>, PipelineError> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut buf = Vec::new();

    let mut url_elements = 0usize;
    let mut is_index = false;
    // Element depth below the current `<url>`; 0 when outside one.
    let mut depth = 0usize;
    let mut field = UrlField::None;
    let mut loc: Option<String> = None;
    let mut lastmod: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if depth == 0 {
                    match name.as_ref() {
                        b"url" => {
                            url_elements += 1;
                            depth = 1;
                            loc = None;
                            lastmod = None;
                        }
                        b"sitemapindex" => is_index = true,
                        _ => {}
                    }
                } else {
                    if depth == 1 {
                        field = match name.as_ref() {
                            b"loc" if loc.is_none() => UrlField::Loc,
                            b"lastmod" if lastmod.is_none() => UrlField::LastMod,
                            _ => UrlField::None,
                        };
                    }
                    depth += 1;
                }
            }
            Ok(Event::Text(e)) if field != UrlField::None => {
                let text = e
                    .unescape()
                    .map_err(|e| PipelineError::InvalidListing(e.to_string()))?;
                append_field(field, &text, &mut loc, &mut lastmod);
            }
            Ok(Event::CData(e)) if field != UrlField::None => {
                let text = String::from_utf8_lossy(&e).to_string();
                append_field(field, &text, &mut loc, &mut lastmod);
            }
            Ok(Event::End(_)) if depth > 1 => {
                depth -= 1;
                field = UrlField::None;
            }
            Ok(Event::End(_)) if depth == 1 => {
                depth = 0;
                let url = loc.take().map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
                let modified = lastmod.take().and_then(|m| parse_timestamp(m.trim()));
                match (url, modified) {
                    (Some(url), Some(modified)) => {
                        if seen.insert(url.clone()) {
                            entries.push(ListingEntry::new(url, Some(modified)));
                        }
                    }
                    (url, _) => debug!("Dropping sitemap entry without loc/lastmod: {:?}", url),
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(PipelineError::InvalidListing(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if url_elements == 0 {
        if is_index {
            warn!("Sitemap is a sitemap index with no <url> entries; point the listing at a post sitemap");
        } else {
            warn!("Sitemap has no <url> entries");
        }
    }

    Ok(entries)
}

/// One entry per article card. Cards without a link are dropped; cards
/// without a readable datetime are kept with unknown recency.
pub fn parse_listing_page(
    html: &str,
    base_url: &Url,
    selectors: &ListingSelectors,
) -> Result<Vec<ListingEntry>, PipelineError> {
    let card_selector = parse_selector(&selectors.card)?;
    let link_selector = parse_selector(&selectors.link)?;
    let any_link = parse_selector("a[href]")?;
    let time_selector = parse_selector(&selectors.time)?;

    let page = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for card in page.select(&card_selector) {
        let href = card
            .select(&link_selector)
            .chain(card.select(&any_link))
            .find_map(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|h| !h.is_empty());

        let Some(href) = href else {
            debug!("Dropping listing card without a link");
            continue;
        };

        let url = match base_url.join(href) {
            Ok(url) => url.to_string(),
            Err(e) => {
                debug!("Dropping listing card with bad link {:?}: {}", href, e);
                continue;
            }
        };

        let last_modified = card
            .select(&time_selector)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .and_then(|dt| parse_timestamp(dt.trim()));

        if seen.insert(url.clone()) {
            entries.push(ListingEntry::new(url, last_modified));
        }
    }

    Ok(entries)
}

/// Keep entries newer than `cutoff` or of unknown recency, scanning all.
pub fn filter_recent(entries: Vec<ListingEntry>, cutoff: DateTime<Utc>) -> Vec<ListingEntry> {
    entries
        .into_iter()
        .filter(|entry| entry.last_modified.map_or(true, |ts| ts > cutoff))
        .collect()
}

/// Like `filter_recent`, but stops at the first entry at or before `cutoff`.
pub fn take_recent(entries: Vec<ListingEntry>, cutoff: DateTime<Utc>) -> Vec<ListingEntry> {
    entries
        .into_iter()
        .take_while(|entry| entry.last_modified.map_or(true, |ts| ts > cutoff))
        .collect()
}

/// RFC 3339, a naive ISO datetime (read as UTC) or a bare date (midnight UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_selector(selector: &str) -> Result<Selector, PipelineError> {
    Selector::parse(selector).map_err(|e| PipelineError::Selector(format!("{}: {}", selector, e)))
}
