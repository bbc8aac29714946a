//! Pagination helpers for Backlog listings
//!
//! Two schemes are in use:
//! - Offset/count: issues and shared-file directories
//! - Cursor (`minId`): issue comments
//!
//! Both stop when a page comes back shorter than the page size, and both
//! concatenate pages in the order the remote returned them.
//!
//! Includes a maximum-iteration guard against endpoints that never return a
//! short page.

use crate::client::{FetcherError, FetcherResult};
use std::future::Future;
use tracing::debug;

/// Maximum number of pagination iterations to prevent infinite loops
pub const MAX_ITERATIONS: usize = 10_000;

/// Offset-based pagination
///
/// `fetch_page(offset, count)` is called with offsets `0, n, 2n, ...` until a
/// page holds fewer than `page_size` items.
///
/// # Errors
/// Returns the first page error, or an error if max iterations are exceeded.
pub async fn paginate_offset<T, F, Fut>(page_size: usize, mut fetch_page: F) -> FetcherResult<Vec<T>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = FetcherResult<Vec<T>>>,
{
    let page_size = page_size.max(1);
    let mut items = Vec::new();
    let mut offset = 0;

    for iteration in 0..MAX_ITERATIONS {
        let page = fetch_page(offset, page_size).await?;
        let received = page.len();
        debug!(iteration, offset, received, "Fetched offset page");

        items.extend(page);

        if received < page_size {
            debug!(
                "Pagination complete after {} pages. Total items: {}",
                iteration + 1,
                items.len()
            );
            return Ok(items);
        }
        offset += received;
    }

    Err(FetcherError::Parse(format!(
        "Max iterations ({MAX_ITERATIONS}) exceeded at offset {offset} - possible infinite loop"
    )))
}

/// Cursor-based pagination
///
/// `fetch_page(cursor, count)` starts with `None`; each following call passes
/// the cursor extracted from the last item of the previous page.
///
/// # Errors
/// Returns the first page error, an error when an item has no cursor or the
/// cursor fails to advance, or an error if max iterations are exceeded.
pub async fn paginate_cursor<T, C, K, F, Fut>(
    page_size: usize,
    cursor_of: K,
    mut fetch_page: F,
) -> FetcherResult<Vec<T>>
where
    C: Clone + PartialEq + std::fmt::Debug,
    K: Fn(&T) -> Option<C>,
    F: FnMut(Option<C>, usize) -> Fut,
    Fut: Future<Output = FetcherResult<Vec<T>>>,
{
    let page_size = page_size.max(1);
    let mut items: Vec<T> = Vec::new();
    let mut cursor: Option<C> = None;

    for iteration in 0..MAX_ITERATIONS {
        let page = fetch_page(cursor.clone(), page_size).await?;
        let received = page.len();
        debug!(iteration, ?cursor, received, "Fetched cursor page");

        if received < page_size {
            items.extend(page);
            return Ok(items);
        }

        // A full page always has a last item.
        let next = page
            .last()
            .and_then(&cursor_of)
            .ok_or_else(|| FetcherError::Parse("page item carries no cursor".to_string()))?;
        if cursor.as_ref() == Some(&next) {
            return Err(FetcherError::Parse(format!(
                "cursor did not advance past {next:?}"
            )));
        }

        items.extend(page);
        cursor = Some(next);
    }

    Err(FetcherError::Parse(format!(
        "Max iterations ({MAX_ITERATIONS}) exceeded - possible infinite loop"
    )))
}
