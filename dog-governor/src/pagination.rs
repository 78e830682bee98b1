//! Transparent walking of multi-page provider result sets.
//!
//! The record cap is checked between pages, never mid-page, so a capped
//! result may hold up to one page more than `max_records`. A failing page
//! discards everything accumulated so far.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PaginationSettings;
use crate::error::{GovernorError, GovernorResult};

/// One page returned by the control-plane API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<R> {
    pub rows: Vec<R>,

    /// Provider's estimate of the total result size, if it gives one
    pub total_records: Option<u64>,

    /// More data is available beyond this page
    pub truncated: bool,

    /// Continuation token for the next page (present when truncated)
    pub next_cursor: Option<String>,
}

impl<R> Page<R> {
    /// A final page
    pub fn last(rows: Vec<R>) -> Self {
        Self {
            rows,
            total_records: None,
            truncated: false,
            next_cursor: None,
        }
    }

    /// A page followed by more data at `cursor`
    pub fn more(rows: Vec<R>, cursor: impl Into<String>) -> Self {
        Self {
            rows,
            total_records: None,
            truncated: true,
            next_cursor: Some(cursor.into()),
        }
    }

    pub fn with_total(mut self, total_records: u64) -> Self {
        self.total_records = Some(total_records);
        self
    }

    /// Whether another page can be requested
    pub fn has_more(&self) -> bool {
        self.truncated && self.next_cursor.is_some()
    }
}

/// Running state of one `fetch_all` call
#[derive(Debug, Clone, Default)]
pub struct PageCursor {
    /// Opaque continuation token; `None` requests the first page
    pub token: Option<String>,
    pub rows_accumulated: usize,
    pub total_records: Option<u64>,
    pub max_records: usize,
    pub pages_fetched: u32,
}

impl PageCursor {
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records,
            ..Self::default()
        }
    }

    pub fn cap_reached(&self) -> bool {
        self.rows_accumulated >= self.max_records
    }
}

/// Accumulated result of walking every page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSet<R> {
    pub rows: Vec<R>,
    pub total_records: Option<u64>,
    pub pages_fetched: u32,

    /// Stopped by the record or page cap while the provider still had data
    pub capped: bool,
}

impl<R> PageSet<R> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<R> {
        self.rows
    }
}

/// Repeatedly invokes a page fetch until the provider runs out of pages or
/// a cap is reached
#[derive(Debug, Clone)]
pub struct Paginator {
    max_pages: u32,
}

impl Paginator {
    pub fn new(max_pages: u32) -> Self {
        Self {
            max_pages: max_pages.max(1),
        }
    }

    pub fn from_settings(settings: &PaginationSettings) -> Self {
        Self::new(settings.max_pages)
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Walk pages via `page_fetch(cursor)` until the provider signals no
    /// more data or `max_records` rows have been accumulated. A zero cap
    /// fetches nothing.
    pub async fn fetch_all<R, F, Fut>(
        &self,
        mut page_fetch: F,
        max_records: usize,
    ) -> GovernorResult<PageSet<R>>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = GovernorResult<Page<R>>>,
    {
        let mut cursor = PageCursor::new(max_records);
        let mut rows = Vec::new();

        if cursor.cap_reached() {
            return Ok(Self::finish(rows, &cursor, true));
        }

        loop {
            let page = page_fetch(cursor.token.take()).await.map_err(|e| {
                GovernorError::Pagination {
                    pages_fetched: cursor.pages_fetched,
                    source: Box::new(e),
                }
            })?;

            cursor.pages_fetched += 1;
            if page.total_records.is_some() {
                cursor.total_records = page.total_records;
            }
            let has_more = page.has_more();
            rows.extend(page.rows);
            cursor.rows_accumulated = rows.len();

            debug!(
                page = cursor.pages_fetched,
                rows = cursor.rows_accumulated,
                total = ?cursor.total_records,
                has_more,
                "Fetched page"
            );

            if !has_more {
                return Ok(Self::finish(rows, &cursor, false));
            }

            if cursor.cap_reached() {
                debug!(
                    max_records = cursor.max_records,
                    rows = cursor.rows_accumulated,
                    "Record cap reached, stopping pagination"
                );
                return Ok(Self::finish(rows, &cursor, true));
            }

            if cursor.pages_fetched >= self.max_pages {
                warn!(
                    max_pages = self.max_pages,
                    rows = cursor.rows_accumulated,
                    "Page cap reached, stopping pagination"
                );
                return Ok(Self::finish(rows, &cursor, true));
            }

            cursor.token = page.next_cursor;
        }
    }

    fn finish<R>(rows: Vec<R>, cursor: &PageCursor, capped: bool) -> PageSet<R> {
        PageSet {
            rows,
            total_records: cursor.total_records,
            pages_fetched: cursor.pages_fetched,
            capped,
        }
    }
}

impl Default for Paginator {
    fn default() -> Self {
        Self::from_settings(&PaginationSettings::default())
    }
}
